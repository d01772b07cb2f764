use std::io::{Read, Seek, SeekFrom, Write};

use archive7::{Archive, DeleteMode, Error, Operand, Query, SetupOptions};
use uuid::Uuid;

const SECRET: [u8; 32] = [0u8; 32];

fn scratch() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.a7");
    (dir, path)
}

fn new_archive(path: &std::path::Path) -> Archive {
    let opts = SetupOptions {
        owner: Uuid::new_v4(),
        title: "test container".to_string(),
        ..SetupOptions::default()
    };
    Archive::setup(path, &SECRET, opts).unwrap()
}

#[test]
fn create_and_read_back() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);

    ar.mkdir("/d").unwrap();
    ar.mkfile("/d/f", b"hello world").unwrap();

    assert_eq!(ar.load("/d/f").unwrap(), b"hello world");
    assert_eq!(ar.info("/d/f").unwrap().length, 11);
    assert_eq!(ar.stats().title, "test container");
    ar.close().unwrap();
}

#[test]
fn cross_block_write_then_truncate() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);

    let payload = vec![b'A'; 10_000];
    ar.mkfile("/big", &payload).unwrap();
    assert_eq!(ar.load("/big").unwrap(), payload);

    {
        let mut f = ar.open_file("/big", "r+b").unwrap();
        f.seek(SeekFrom::Start(4008)).unwrap();
        f.truncate(None).unwrap();
        f.close().unwrap();
    }
    assert_eq!(ar.info("/big").unwrap().length, 4008);
    assert_eq!(ar.load("/big").unwrap(), vec![b'A'; 4008]);
    ar.close().unwrap();
}

#[test]
fn truncated_blocks_are_reused_after_reopen() {
    let (_dir, path) = scratch();
    {
        let mut ar = new_archive(&path);
        ar.mkfile("/big", &vec![b'B'; 10_000]).unwrap();
        let mut f = ar.open_file("/big", "r+").unwrap();
        f.truncate(Some(0)).unwrap();
        f.close().unwrap();
        ar.close().unwrap();
    }
    let grown = std::fs::metadata(&path).unwrap().len();

    {
        let mut ar = Archive::open(&path, &SECRET, DeleteMode::Erase).unwrap();
        // The new file's stream comes out of the recycled pool instead of
        // growing the host file.
        ar.mkfile("/small", b"tiny").unwrap();
        ar.close().unwrap();
    }
    assert_eq!(std::fs::metadata(&path).unwrap().len(), grown);
}

#[test]
fn rename_and_move() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);

    ar.mkdir("/x").unwrap();
    ar.mkdir("/y").unwrap();
    ar.mkfile("/x/a", b"q").unwrap();

    ar.rename("/x/a", "b").unwrap();
    ar.move_entry("/x/b", "/y").unwrap();

    assert!(ar.isfile("/y/b").unwrap());
    assert!(!ar.isfile("/x/a").unwrap());
    assert_eq!(ar.info("/y/b").unwrap().length, 1);
    ar.close().unwrap();
}

#[test]
fn link_semantics() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);

    ar.mkfile("/t", b"hi").unwrap();
    ar.link("/ln", "/t").unwrap();

    assert!(ar.islink("/ln").unwrap());
    assert!(!ar.isfile("/ln").unwrap());
    assert_eq!(ar.load("/ln").unwrap(), b"hi");

    assert!(matches!(ar.link("/ln2", "/ln"), Err(Error::LinkToLink)));
    ar.close().unwrap();
}

#[test]
fn corruption_is_detected_but_metadata_survives() {
    let (_dir, path) = scratch();
    {
        let mut ar = new_archive(&path);
        ar.mkfile("/big", &vec![b'C'; 10_000]).unwrap();
        ar.close().unwrap();
    }

    // Flip one ciphertext byte in the last block — part of the file's
    // data chain, written after all index pages.
    {
        let len = std::fs::metadata(&path).unwrap().len();
        let mut f = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let target = len - 2048;
        f.seek(SeekFrom::Start(target)).unwrap();
        let mut byte = [0u8; 1];
        f.read_exact(&mut byte).unwrap();
        f.seek(SeekFrom::Start(target)).unwrap();
        f.write_all(&[byte[0] ^ 0x80]).unwrap();
    }

    let mut ar = Archive::open(&path, &SECRET, DeleteMode::Erase).unwrap();
    // Metadata paths still work...
    assert_eq!(ar.stats().title, "test container");
    assert_eq!(ar.info("/big").unwrap().length, 10_000);
    // ...but reading the damaged stream fails authentication.
    assert!(ar.load("/big").is_err());
    ar.close().unwrap();
}

#[test]
fn wrong_secret_fails_at_mount() {
    let (_dir, path) = scratch();
    {
        let mut ar = new_archive(&path);
        ar.close().unwrap();
    }
    let bad = [1u8; 32];
    assert!(Archive::open(&path, &bad, DeleteMode::Erase).is_err());
}

#[test]
fn second_opener_is_locked_out() {
    let (_dir, path) = scratch();
    let ar = new_archive(&path);
    assert!(Archive::open(&path, &SECRET, DeleteMode::Erase).is_err());
    drop(ar);
    let mut again = Archive::open(&path, &SECRET, DeleteMode::Erase).unwrap();
    again.close().unwrap();
}

#[test]
fn glob_and_search() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);

    ar.mkdir("/logs").unwrap();
    for i in 0..5 {
        ar.mkfile(&format!("/logs/run-{i}.log"), b"x").unwrap();
    }
    ar.mkfile("/logs/notes.txt", b"y").unwrap();
    ar.chmod("/logs/run-0.log", None, Some("u3"), None).unwrap();
    ar.chmod("/logs/run-1.log", None, Some("u3"), None).unwrap();

    let hits = ar.glob(&Query::any().name("*.log")).unwrap();
    assert_eq!(hits.len(), 5);
    assert!(hits.contains("/logs/run-4.log"));
    assert!(!hits.contains("/logs/notes.txt"));

    let q = Query::any().name("*.log").user("u3", Operand::Eq).unwrap();
    assert_eq!(ar.glob(&q).unwrap().len(), 2);

    // The `<` operand keeps entries stamped after the threshold.
    ar.save("/logs/notes.txt", b"new", Some(5_000_000_000)).unwrap();
    let q = Query::any().modified(4_000_000_000, Operand::Lt).unwrap();
    let hits = ar.glob(&q).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits.contains("/logs/notes.txt"));

    let found: Vec<String> = ar
        .search(Query::any().name("run-?.log"))
        .map(|item| item.unwrap().1)
        .collect();
    assert_eq!(found.len(), 5);
    ar.close().unwrap();
}

#[test]
fn remove_modes_through_the_facade() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);

    ar.mkdir("/d").unwrap();
    ar.mkfile("/d/f", b"z").unwrap();

    assert!(matches!(
        ar.remove("/d", None),
        Err(Error::FilesInDir { .. })
    ));

    // SOFT keeps the entry visible (flagged) in its listing.
    ar.remove("/d/f", Some(DeleteMode::Soft)).unwrap();
    assert!(ar.info("/d/f").unwrap().deleted);

    // ERASE makes it disappear.
    ar.remove("/d/f", Some(DeleteMode::Erase)).unwrap();
    assert!(matches!(
        ar.info("/d/f"),
        Err(Error::ArchiveNotFound { .. })
    ));
    ar.remove("/d", None).unwrap();
    assert!(!ar.isdir("/d").unwrap());
    ar.close().unwrap();
}

#[test]
fn save_updates_content_and_timestamp() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);

    ar.mkfile("/a", b"first").unwrap();
    ar.save("/a", b"second version", Some(1234)).unwrap();
    assert_eq!(ar.load("/a").unwrap(), b"second version");
    let info = ar.info("/a").unwrap();
    assert_eq!(info.length, 14);
    assert_eq!(info.modified, 1234);
    ar.close().unwrap();
}

#[test]
fn file_object_streaming_io() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);

    {
        let mut f = ar.open_file("/stream.bin", "w+").unwrap();
        let chunk: Vec<u8> = (0..255u8).collect();
        for _ in 0..40 {
            f.write_all(&chunk).unwrap();
        }
        f.flush().unwrap();
        f.seek(SeekFrom::Start(255)).unwrap();
        let mut back = vec![0u8; 255];
        f.read_exact(&mut back).unwrap();
        assert_eq!(back, chunk);
        f.close().unwrap();
    }
    assert_eq!(ar.info("/stream.bin").unwrap().length, 255 * 40);

    // The descriptor table refuses aliased access to one entry.
    let f1 = ar.open_file("/stream.bin", "r").unwrap();
    assert!(matches!(
        ar.open_file("/stream.bin", "r"),
        Err(Error::FileAlreadyOpen { .. })
    ));
    drop(f1);
    let f2 = ar.open_file("/stream.bin", "r").unwrap();
    drop(f2);
    ar.close().unwrap();
}

#[test]
fn exclusive_create_mode() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);

    let mut f = ar.open_file("/only-once", "x").unwrap();
    f.write_all(b"1").unwrap();
    f.close().unwrap();
    assert!(matches!(
        ar.open_file("/only-once", "x"),
        Err(Error::PathExistsAlready { .. })
    ));
    ar.close().unwrap();
}

#[test]
fn everything_survives_reopen() {
    let (_dir, path) = scratch();
    let owner = Uuid::new_v4();
    {
        let mut ar = Archive::setup(
            &path,
            &SECRET,
            SetupOptions {
                owner,
                title: "durable".to_string(),
                ..SetupOptions::default()
            },
        )
        .unwrap();
        ar.mkdir("/a").unwrap();
        ar.mkdir("/a/b").unwrap();
        ar.mkfile("/a/b/deep.txt", b"still here").unwrap();
        ar.link("/shortcut", "/a/b/deep.txt").unwrap();
        ar.close().unwrap();
    }

    let mut ar = Archive::open(&path, &SECRET, DeleteMode::Erase).unwrap();
    let header = ar.stats();
    assert_eq!(header.owner, owner);
    assert_eq!(header.title, "durable");
    assert_eq!(ar.load("/a/b/deep.txt").unwrap(), b"still here");
    assert_eq!(ar.load("/shortcut").unwrap(), b"still here");
    assert!(ar.isdir("/a/b").unwrap());
    ar.close().unwrap();
}

#[test]
fn missing_paths_surface_as_archive_not_found() {
    let (_dir, path) = scratch();
    let mut ar = new_archive(&path);
    assert!(matches!(
        ar.load("/nope"),
        Err(Error::ArchiveNotFound { .. })
    ));
    assert!(matches!(
        ar.mkfile("/nodir/f", b""),
        Err(Error::ArchiveNotFound { .. })
    ));
    assert!(matches!(
        ar.load("relative"),
        Err(Error::NotAbsolutePath { .. })
    ));
    ar.close().unwrap();
}

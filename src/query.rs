//! Composable entry predicates for `glob` and `search`.
//!
//! A [`Query`] is a conjunction of optional facets; an unset facet passes
//! everything.  Facets taking an operand validate it at build time
//! (`OperandInvalid`), so evaluation itself cannot fail.
//!
//! The name facet is a glob: `*` matches any run of characters, `?` any
//! single one; everything else is literal.
//!
//! The time operands are threshold-relative, keeping the orientation the
//! format has always had: `<` keeps entries whose timestamp is *greater*
//! than the threshold, `>` keeps those below it, `=` matches exactly.

use regex::Regex;
use uuid::Uuid;

use crate::entry::{Entry, EntryType};
use crate::error::{Error, Result};

// ── Operand ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Eq,
    Ne,
    Gt,
    Lt,
}

impl Operand {
    /// Parse `"="`, `"≠"` (or `"!="`), `">"`, `"<"`.
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "=" => Ok(Operand::Eq),
            "≠" | "!=" => Ok(Operand::Ne),
            ">" => Ok(Operand::Gt),
            "<" => Ok(Operand::Lt),
            _ => Err(Error::OperandInvalid {
                operand: text.to_string(),
            }),
        }
    }

    fn equality_only(self) -> Result<Self> {
        match self {
            Operand::Eq | Operand::Ne => Ok(self),
            _ => Err(Error::OperandInvalid {
                operand: format!("{self:?}"),
            }),
        }
    }

    fn comparison_only(self) -> Result<Self> {
        match self {
            Operand::Eq | Operand::Gt | Operand::Lt => Ok(self),
            _ => Err(Error::OperandInvalid {
                operand: format!("{self:?}"),
            }),
        }
    }
}

// ── Query ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct Query {
    name:     Option<Regex>,
    id:       Option<Uuid>,
    parent:   Option<(Vec<Uuid>, Operand)>,
    owner:    Option<(Vec<Uuid>, Operand)>,
    created:  Option<(i64, Operand)>,
    modified: Option<(i64, Operand)>,
    deleted:  Option<bool>,
    user:     Option<(String, Operand)>,
    group:    Option<(String, Operand)>,
    types:    Option<Vec<EntryType>>,
}

impl Query {
    /// A query that matches every entry.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn name(mut self, glob: &str) -> Self {
        self.name = Some(glob_to_regex(glob));
        self
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Match entries whose parent is (or is not) one of `ids`.
    pub fn parent(mut self, ids: Vec<Uuid>, operand: Operand) -> Result<Self> {
        self.parent = Some((ids, operand.equality_only()?));
        Ok(self)
    }

    pub fn owner(mut self, ids: Vec<Uuid>, operand: Operand) -> Result<Self> {
        self.owner = Some((ids, operand.equality_only()?));
        Ok(self)
    }

    pub fn created(mut self, threshold: i64, operand: Operand) -> Result<Self> {
        self.created = Some((threshold, operand.comparison_only()?));
        Ok(self)
    }

    pub fn modified(mut self, threshold: i64, operand: Operand) -> Result<Self> {
        self.modified = Some((threshold, operand.comparison_only()?));
        Ok(self)
    }

    /// `Some(flag)` to require a deletion state, `None` for any.
    pub fn deleted(mut self, state: Option<bool>) -> Self {
        self.deleted = state;
        self
    }

    pub fn user(mut self, user: &str, operand: Operand) -> Result<Self> {
        self.user = Some((user.to_string(), operand.equality_only()?));
        Ok(self)
    }

    pub fn group(mut self, group: &str, operand: Operand) -> Result<Self> {
        self.group = Some((group.to_string(), operand.equality_only()?));
        Ok(self)
    }

    /// Restrict to the given entry types (the default allows all three).
    pub fn types(mut self, kinds: &[EntryType]) -> Self {
        self.types = Some(kinds.to_vec());
        self
    }

    /// Evaluate the conjunction against one entry.
    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(kinds) = &self.types {
            if !kinds.contains(&entry.kind) {
                return false;
            }
        }
        if let Some(re) = &self.name {
            if !re.is_match(&entry.name) {
                return false;
            }
        }
        if let Some(id) = self.id {
            if entry.id != id {
                return false;
            }
        }
        if let Some((ids, op)) = &self.parent {
            let hit = ids.contains(&entry.parent);
            if (*op == Operand::Eq) != hit {
                return false;
            }
        }
        if let Some((ids, op)) = &self.owner {
            let hit = ids.contains(&entry.owner);
            if (*op == Operand::Eq) != hit {
                return false;
            }
        }
        if let Some((threshold, op)) = self.created {
            if !time_facet(entry.created, threshold, op) {
                return false;
            }
        }
        if let Some((threshold, op)) = self.modified {
            if !time_facet(entry.modified, threshold, op) {
                return false;
            }
        }
        if let Some(state) = self.deleted {
            if entry.deleted != state {
                return false;
            }
        }
        if let Some((user, op)) = &self.user {
            if (*op == Operand::Eq) != (entry.user == *user) {
                return false;
            }
        }
        if let Some((group, op)) = &self.group {
            if (*op == Operand::Eq) != (entry.group == *group) {
                return false;
            }
        }
        true
    }
}

fn time_facet(value: i64, threshold: i64, op: Operand) -> bool {
    match op {
        Operand::Eq => value == threshold,
        Operand::Lt => value > threshold,
        Operand::Gt => value < threshold,
        Operand::Ne => false,
    }
}

/// Translate a glob into an anchored regex: `*` → `.*`, `?` → `.`, all
/// other characters literal.
fn glob_to_regex(glob: &str) -> Regex {
    let escaped = regex::escape(glob).replace(r"\*", ".*").replace(r"\?", ".");
    // The escape/replace pipeline only yields valid patterns.
    Regex::new(&format!("^{escaped}$")).expect("glob translation produced invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> Entry {
        let mut e = Entry::blank(EntryType::File, name, Uuid::nil()).unwrap();
        e.created = 100;
        e.modified = 200;
        e.user = "alice".into();
        e
    }

    #[test]
    fn glob_wildcards() {
        let q = Query::any().name("*.log");
        assert!(q.matches(&sample("build.log")));
        assert!(q.matches(&sample(".log")));
        assert!(!q.matches(&sample("build.log.1")));

        let q = Query::any().name("file-?.txt");
        assert!(q.matches(&sample("file-a.txt")));
        assert!(!q.matches(&sample("file-ab.txt")));

        // Regex metacharacters in the glob stay literal.
        let q = Query::any().name("a+b");
        assert!(q.matches(&sample("a+b")));
        assert!(!q.matches(&sample("aab")));
    }

    #[test]
    fn time_operands_are_threshold_relative() {
        let e = sample("t");
        assert!(Query::any().created(50, Operand::Lt).unwrap().matches(&e));
        assert!(!Query::any().created(150, Operand::Lt).unwrap().matches(&e));
        assert!(Query::any().created(150, Operand::Gt).unwrap().matches(&e));
        assert!(Query::any().created(100, Operand::Eq).unwrap().matches(&e));
        assert!(Query::any().modified(150, Operand::Lt).unwrap().matches(&e));
    }

    #[test]
    fn invalid_operands_are_rejected_at_build() {
        assert!(Query::any().created(0, Operand::Ne).is_err());
        assert!(Query::any().parent(vec![], Operand::Lt).is_err());
        assert!(Query::any().user("x", Operand::Gt).is_err());
        assert!(Operand::parse("<>").is_err());
        assert_eq!(Operand::parse("≠").unwrap(), Operand::Ne);
    }

    #[test]
    fn facets_conjoin() {
        let e = sample("report.txt");
        let q = Query::any()
            .name("report.*")
            .user("alice", Operand::Eq)
            .unwrap()
            .deleted(Some(false))
            .types(&[EntryType::File]);
        assert!(q.matches(&e));
        assert!(!q.clone().matches(&{
            let mut d = e.clone();
            d.deleted = true;
            d
        }));
        let q = q.types(&[EntryType::Dir]);
        assert!(!q.matches(&e));
    }

    #[test]
    fn user_inequality() {
        let e = sample("x");
        assert!(!Query::any().user("alice", Operand::Ne).unwrap().matches(&e));
        assert!(Query::any().user("bob", Operand::Ne).unwrap().matches(&e));
    }
}

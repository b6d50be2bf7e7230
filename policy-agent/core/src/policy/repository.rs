use super::sanitize::{sanitize, RuleError};
use parking_lot::RwLock;
use policy_agent_k8s_api::{policy::Rule, LabelArray};
use tracing::debug;

/// An ordered set of policy rules.
///
/// Every mutation bumps the revision, so that consumers can tell whether the rule set they
/// computed from is still current.
#[derive(Debug)]
pub struct Repository {
    state: RwLock<State>,
}

/// The outcome of [`Repository::replace_by_labels`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Replaced {
    pub revision: u64,
    pub deleted: usize,
    pub added: usize,
}

#[derive(Debug)]
struct State {
    rules: Vec<Rule>,
    revision: u64,
}

impl Default for Repository {
    fn default() -> Self {
        Self {
            state: RwLock::new(State {
                rules: Vec::new(),
                revision: 1,
            }),
        }
    }
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, rule: Rule) -> Result<u64, RuleError> {
        self.add_list(vec![rule])
    }

    /// Appends rules after validating all of them; nothing is added if any rule is invalid.
    pub fn add_list(&self, rules: Vec<Rule>) -> Result<u64, RuleError> {
        rules.iter().try_for_each(sanitize)?;

        let mut state = self.state.write();
        state.rules.extend(rules);
        state.revision += 1;
        Ok(state.revision)
    }

    /// Returns a snapshot of all rules.
    pub fn rules(&self) -> Vec<Rule> {
        self.state.read().rules.clone()
    }

    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    pub fn len(&self) -> usize {
        self.state.read().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().rules.is_empty()
    }

    /// Returns the rules whose labels contain every label in `labels`.
    pub fn search(&self, labels: &LabelArray) -> Vec<Rule> {
        self.state
            .read()
            .rules
            .iter()
            .filter(|r| r.labels.contains(labels))
            .cloned()
            .collect()
    }

    /// Returns true if, for every label array in `needed`, some rule carries all of its labels.
    pub fn contains_all(&self, needed: &[LabelArray]) -> bool {
        let state = self.state.read();
        needed
            .iter()
            .all(|labels| state.rules.iter().any(|r| r.labels.contains(labels)))
    }

    /// Removes every rule whose labels contain `labels`.
    ///
    /// Returns the current revision and the number of rules deleted.
    pub fn delete_by_labels(&self, labels: &LabelArray) -> (u64, usize) {
        let mut state = self.state.write();
        let before = state.rules.len();
        state.rules.retain(|r| !r.labels.contains(labels));
        let deleted = before - state.rules.len();
        if deleted > 0 {
            state.revision += 1;
            debug!(%labels, deleted, revision = state.revision, "Deleted rules");
        }
        (state.revision, deleted)
    }

    /// Replaces every rule whose labels contain `owner` with `rules`.
    ///
    /// The new rules are validated before the repository is touched. Readers observe either the
    /// previous rule set or the new one, never an intermediate state. Unrelated rules keep their
    /// relative order; new rules are appended. If the owned rules already equal `rules`, nothing
    /// changes and the revision is kept.
    pub fn replace_by_labels(
        &self,
        owner: &LabelArray,
        rules: Vec<Rule>,
    ) -> Result<Replaced, RuleError> {
        rules.iter().try_for_each(sanitize)?;

        let mut state = self.state.write();
        let owned = state.rules.iter().filter(|r| r.labels.contains(owner));
        if owned.eq(rules.iter()) {
            debug!(%owner, revision = state.revision, "Rules unchanged");
            return Ok(Replaced {
                revision: state.revision,
                deleted: 0,
                added: 0,
            });
        }

        let before = state.rules.len();
        state.rules.retain(|r| !r.labels.contains(owner));
        let deleted = before - state.rules.len();
        let added = rules.len();
        state.rules.extend(rules);
        if deleted > 0 || added > 0 {
            state.revision += 1;
        }
        debug!(%owner, deleted, added, revision = state.revision, "Replaced rules");

        Ok(Replaced {
            revision: state.revision,
            deleted,
            added,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_agent_k8s_api::Selector;

    fn labels(ls: &[&str]) -> LabelArray {
        LabelArray::parse(ls.iter().copied()).unwrap()
    }

    fn mk_rule(ls: &[&str]) -> Rule {
        Rule {
            labels: labels(ls),
            ..Default::default()
        }
    }

    #[test]
    fn search_by_label_subset() {
        let repo = Repository::new();
        repo.add_list(vec![
            mk_rule(&["k8s:owner=a", "k8s:team=x"]),
            mk_rule(&["k8s:owner=b"]),
        ])
        .unwrap();

        assert_eq!(repo.search(&labels(&["k8s:owner=a"])).len(), 1);
        assert_eq!(repo.search(&labels(&[])).len(), 2);
        assert!(repo.contains_all(&[labels(&["k8s:owner=a"]), labels(&["k8s:owner=b"])]));
        assert!(!repo.contains_all(&[labels(&["k8s:owner=c"])]));
    }

    #[test]
    fn replace_keeps_unowned_rules_in_order() {
        let repo = Repository::new();
        repo.add_list(vec![
            mk_rule(&["k8s:owner=a"]),
            mk_rule(&["k8s:owner=b"]),
            mk_rule(&["k8s:owner=a", "k8s:n=2"]),
            mk_rule(&["k8s:owner=c"]),
        ])
        .unwrap();
        let rev = repo.revision();

        let replaced = repo
            .replace_by_labels(&labels(&["k8s:owner=a"]), vec![mk_rule(&["k8s:owner=a", "k8s:n=3"])])
            .unwrap();
        assert_eq!(
            replaced,
            Replaced {
                revision: rev + 1,
                deleted: 2,
                added: 1,
            }
        );
        assert_eq!(
            repo.rules(),
            vec![
                mk_rule(&["k8s:owner=b"]),
                mk_rule(&["k8s:owner=c"]),
                mk_rule(&["k8s:owner=a", "k8s:n=3"]),
            ]
        );
    }

    #[test]
    fn replacing_with_equal_rules_keeps_revision() {
        let repo = Repository::new();
        let owner = labels(&["k8s:owner=a"]);
        let rules = vec![
            mk_rule(&["k8s:owner=a", "k8s:n=1"]),
            mk_rule(&["k8s:owner=a", "k8s:n=2"]),
        ];
        repo.add(mk_rule(&["k8s:owner=b"])).unwrap();
        let first = repo.replace_by_labels(&owner, rules.clone()).unwrap();

        let again = repo.replace_by_labels(&owner, rules.clone()).unwrap();
        assert_eq!(
            again,
            Replaced {
                revision: first.revision,
                deleted: 0,
                added: 0,
            }
        );
        assert_eq!(repo.revision(), first.revision);

        // Order is part of equality.
        let reordered = rules.into_iter().rev().collect();
        let replaced = repo.replace_by_labels(&owner, reordered).unwrap();
        assert_eq!(replaced.revision, first.revision + 1);
        assert_eq!((replaced.deleted, replaced.added), (2, 2));
    }

    #[test]
    fn invalid_rules_leave_repository_untouched() {
        let repo = Repository::new();
        repo.add(mk_rule(&["k8s:owner=a"])).unwrap();
        let rev = repo.revision();

        let bad = Rule {
            endpoint_selector: Selector::from_iter(Some(("bad key", ""))),
            labels: labels(&["k8s:owner=a"]),
            ..Default::default()
        };
        let err = repo
            .replace_by_labels(&labels(&["k8s:owner=a"]), vec![mk_rule(&["k8s:owner=a"]), bad])
            .unwrap_err();
        assert_eq!(err, RuleError::InvalidKey("bad key".to_string()));
        assert_eq!(repo.revision(), rev);
        assert_eq!(repo.rules(), vec![mk_rule(&["k8s:owner=a"])]);
    }

    #[test]
    fn delete_by_labels_counts_and_bumps() {
        let repo = Repository::new();
        repo.add_list(vec![mk_rule(&["k8s:owner=a"]), mk_rule(&["k8s:owner=a"])])
            .unwrap();
        let rev = repo.revision();

        assert_eq!(repo.delete_by_labels(&labels(&["k8s:owner=b"])), (rev, 0));
        assert_eq!(repo.delete_by_labels(&labels(&["k8s:owner=a"])), (rev + 1, 2));
        assert!(repo.is_empty());
    }
}

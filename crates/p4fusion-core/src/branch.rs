use crate::error::CoreError;

/// One migrated branch: a sub-path under the base depot path and the git
/// branch name it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub depot_sub_path: String,
    pub git_alias: String,
}

impl Branch {
    /// Parse a branch spec: `"subPath"` or `"subPath:alias"`. When the
    /// sub-path itself contains a `':'`, the alias form is mandatory.
    pub fn parse(spec: &str) -> Result<Branch, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidBranchSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (sub_path, alias) = match spec.rsplit_once(':') {
            Some((sub_path, alias)) => (sub_path, alias),
            None => (spec, spec),
        };
        if sub_path.is_empty() {
            return Err(invalid("empty depot sub-path"));
        }
        if alias.is_empty() {
            return Err(invalid("empty git branch alias"));
        }
        let sub_path = sub_path.trim_matches('/');
        if sub_path.is_empty() {
            return Err(invalid("depot sub-path is only slashes"));
        }
        Ok(Branch {
            depot_sub_path: sub_path.to_string(),
            git_alias: alias.to_string(),
        })
    }

    /// If `relative_path` (already stripped of the base depot path) falls
    /// under this branch, return the path within the branch.
    pub fn split_branch_path<'a>(&self, relative_path: &'a str) -> Option<&'a str> {
        relative_path
            .strip_prefix(&self.depot_sub_path)
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

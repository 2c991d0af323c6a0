//! The identity of one installation: the key of the [server
//! registry][`crate::registry::Registry`] and the input to the
//! [server supervisor][`crate::server::Process`].

use std::path::PathBuf;

/// A value-typed tuple identifying one PostgreSQL installation.
///
/// Two [`Config`] values are equal iff their fields are equal — this is
/// plain structural (path-string) equality, not pointer identity, so that
/// the same logical installation always maps to the same registry entry
/// regardless of which code path constructed the `Config`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// Path to the directory containing the `postgres`/`initdb` executables.
    pub binary_path: PathBuf,
    /// Path to the pre-initialized cluster snapshot, cloned per server start.
    pub snapshot_path: PathBuf,
    /// The version's working directory, e.g. `<root>/<version>`.
    pub workdir_path: PathBuf,
}

impl Config {
    pub fn new(binary_path: PathBuf, snapshot_path: PathBuf, workdir_path: PathBuf) -> Self {
        Self { binary_path, snapshot_path, workdir_path }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn equal_configs_hash_to_the_same_bucket() {
        let a = Config::new(PathBuf::from("/a/bin/postgres"), PathBuf::from("/a/snap"), PathBuf::from("/a"));
        let b = Config::new(PathBuf::from("/a/bin/postgres"), PathBuf::from("/a/snap"), PathBuf::from("/a"));
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, "first");
        assert_eq!(map.get(&b), Some(&"first"));
    }

    #[test]
    fn differing_any_field_makes_configs_unequal() {
        let a = Config::new(PathBuf::from("/a/bin/postgres"), PathBuf::from("/a/snap"), PathBuf::from("/a"));
        let b = Config::new(PathBuf::from("/b/bin/postgres"), PathBuf::from("/a/snap"), PathBuf::from("/a"));
        assert_ne!(a, b);
    }
}

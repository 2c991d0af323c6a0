//! A thread-local slot naming the test currently running under
//! [`crate::with_database`], ported from `examples/original_source/pgtest.go`'s
//! `currentT atomic.Value` so log lines emitted by the supervised
//! `postgres` process (and by this crate itself) can be attributed to the
//! test that triggered them.

use std::cell::RefCell;

thread_local! {
    static CURRENT_TEST: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// The name of the test running on this thread, if any.
pub fn current() -> Option<String> {
    CURRENT_TEST.with(|slot| slot.borrow().clone())
}

/// Run `f` with `name` published as the [`current`] test, restoring
/// whatever was previously published (if anything) once `f` returns, even
/// if it panics.
pub fn with_current<F, T>(name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    let previous = CURRENT_TEST.with(|slot| slot.borrow_mut().replace(name.to_owned()));
    let _restore = RestoreOnDrop(previous);
    f()
}

struct RestoreOnDrop(Option<String>);

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        CURRENT_TEST.with(|slot| *slot.borrow_mut() = self.0.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_and_restores_the_current_test_name() {
        assert_eq!(current(), None);
        with_current("my_test", || {
            assert_eq!(current(), Some("my_test".to_owned()));
        });
        assert_eq!(current(), None);
    }

    #[test]
    fn nested_calls_restore_the_outer_name() {
        with_current("outer", || {
            with_current("inner", || {
                assert_eq!(current(), Some("inner".to_owned()));
            });
            assert_eq!(current(), Some("outer".to_owned()));
        });
    }
}

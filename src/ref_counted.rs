use std::{fmt, ops::Deref, sync::Arc};

/// Shared ownership handle for everything that owns GPU state.
///
/// The creator holds the first reference. Every `add_ref` hands out another handle that must be
/// released (or dropped) exactly once. The wrapped value is destroyed synchronously when the last
/// handle goes away.
///
/// Ownership must form a DAG: children keep their parent alive (a buffer holds its `Context`), the
/// parent never holds its children.
pub struct RefCounted<T: ?Sized> {
    inner: Arc<T>,
}

impl<T> RefCounted<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl<T: ?Sized> RefCounted<T> {
    pub fn add_ref(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }

    /// Gives up this reference and returns how many are left. At zero the value has already been
    /// destroyed when this returns.
    pub fn release(self) -> u32 {
        let remaining = Arc::strong_count(&self.inner) - 1;
        drop(self);
        remaining as u32
    }

    pub fn ref_count(&self) -> u32 {
        Arc::strong_count(&self.inner) as u32
    }

    /// Identity comparison. Two handles are equal when they point at the same object, no matter
    /// what the object contains.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<T: ?Sized> Clone for RefCounted<T> {
    fn clone(&self) -> Self {
        self.add_ref()
    }
}

impl<T: ?Sized> Deref for RefCounted<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounted")
            .field("ref_count", &self.ref_count())
            .field("value", &&*self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct DropCounter {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted() -> (RefCounted<DropCounter>, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        let value = RefCounted::new(DropCounter {
            drops: drops.clone(),
        });
        (value, drops)
    }

    #[test]
    fn starts_with_one_reference() {
        let (value, _) = counted();
        assert_eq!(value.ref_count(), 1);
    }

    #[test]
    fn add_ref_and_release_track_the_live_count() {
        let (value, drops) = counted();
        let second = value.add_ref();
        let third = second.add_ref();
        assert_eq!(value.ref_count(), 3);

        assert_eq!(third.release(), 2);
        assert_eq!(value.ref_count(), 2);
        assert_eq!(second.release(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        assert_eq!(value.release(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destructor_runs_exactly_once_on_last_release() {
        let (value, drops) = counted();
        let handles: Vec<_> = (0..5).map(|_| value.add_ref()).collect();
        drop(value);
        for handle in handles {
            assert_eq!(drops.load(Ordering::SeqCst), 0);
            handle.release();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clone_is_add_ref() {
        let (value, _) = counted();
        let clone = value.clone();
        assert!(RefCounted::ptr_eq(&value, &clone));
        assert_eq!(value.ref_count(), 2);
    }

    #[test]
    fn ptr_eq_compares_identity_not_contents() {
        let a = RefCounted::new(7);
        let b = RefCounted::new(7);
        assert!(!RefCounted::ptr_eq(&a, &b));
        assert!(RefCounted::ptr_eq(&a, &a.add_ref()));
    }
}

use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};

/// Ensures that a single closure type across uses of this which, in turn prevents multiple
/// instances of any functions like RawTable::reserve from being generated
#[inline]
pub(crate) fn equivalent_key<Q, K, V>(k: &Q) -> impl Fn(&(K, V)) -> bool + '_
where
    K: Borrow<Q>,
    Q: ?Sized + Eq,
{
    move |x| k.eq(x.0.borrow())
}

/// The set counterpart of `equivalent_key`.
#[inline]
pub(crate) fn equivalent<Q, T>(k: &Q) -> impl Fn(&T) -> bool + '_
where
    T: Borrow<Q>,
    Q: ?Sized + Eq,
{
    move |x| k.eq(x.borrow())
}

/// Hashes the key of a stored entry, used when rehashing into new storage.
#[inline]
pub(crate) fn make_hasher<K, V, S>(hash_builder: &S) -> impl Fn(&(K, V)) -> u64 + '_
where
    K: Hash,
    S: BuildHasher,
{
    move |val| make_hash(hash_builder, &val.0)
}

/// Hashes a stored set element.
#[inline]
pub(crate) fn make_element_hasher<T, S>(hash_builder: &S) -> impl Fn(&T) -> u64 + '_
where
    T: Hash,
    S: BuildHasher,
{
    move |val| make_hash(hash_builder, val)
}

#[inline]
pub(crate) fn make_hash<Q, S>(hash_builder: &S, val: &Q) -> u64
where
    Q: Hash + ?Sized,
    S: BuildHasher,
{
    hash_builder.hash_one(val)
}

/// Unwraps the result of an operation that reports failures by panicking.
#[inline]
pub(crate) fn infallible<T, E>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(_) => unsafe { core::hint::unreachable_unchecked() },
    }
}

//! Record layout assertions.
//!
//! An embedding that marshals record types through raw pointers depends on
//! those records having the exact size and field offsets its host-side
//! glue was built against. [`assert_record_layout!`] turns that dependence
//! into a compile error instead of a silent wire corruption.

/// Assert a record's size and field offsets at compile time.
///
/// ```
/// #[repr(C)]
/// struct Point {
///     x: i32,
///     y: i32,
/// }
///
/// cbind_engine::assert_record_layout! {
///     Point { size: 8, x: 0, y: 4 }
/// }
/// ```
#[macro_export]
macro_rules! assert_record_layout {
    ($ty:ty { size: $size:expr $(, $field:ident : $offset:expr)* $(,)? }) => {
        const _: () = {
            assert!(
                ::core::mem::size_of::<$ty>() == $size,
                concat!("size of ", stringify!($ty))
            );
            $(
                assert!(
                    ::core::mem::offset_of!($ty, $field) == $offset,
                    concat!("offset of ", stringify!($ty), "::", stringify!($field))
                );
            )*
        };
    };
}

//! Profiling support via Tracy.
//!
//! Enable the `profiling` feature to emit spans around compile, allocation,
//! recording and submission. With the feature disabled (the default) every
//! macro expands to nothing.
//!
//! ```ignore
//! use redlilium_framegraph::profiling::{profile_scope, frame_mark};
//!
//! profile_scope!("my_pass");
//! // ...
//! frame_mark!();
//! ```

#[cfg(feature = "profiling")]
pub use tracy_client::{Client, frame_mark as tracy_frame_mark, span};

/// Profile the enclosing scope under a static name.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Profile the enclosing scope under a static name.
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Profile the enclosing scope under a runtime name, such as a pass name.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope_dynamic {
    ($name:expr) => {
        let _profile_span = $crate::profiling::Client::running()
            .map(|c| c.span_alloc(Some($name), "", file!(), line!(), 0));
    };
}

/// Profile the enclosing scope under a runtime name, such as a pass name.
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope_dynamic {
    ($name:expr) => {
        let _ = $name;
    };
}

/// Mark the end of a frame.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

/// Mark the end of a frame.
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

pub use frame_mark;
pub use profile_scope;
pub use profile_scope_dynamic;

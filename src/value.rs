use core::fmt;
use core::fmt::Debug;

use crate::sealed::Sealed;

/// A value kind a table can store next to its keys.
///
/// Values are plain `Copy` data, so a table never runs destructors for them.
/// `()` selects set mode: the value array then occupies no memory.
pub trait Value: Copy + PartialEq + Debug + Sealed {
    /// Name used when rendering a map, e.g. `int64`.
    const NAME: &'static str;

    /// Writes the value the way a map rendering shows it.
    fn fmt_value(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

macro_rules! scalar_value {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Value for $ty {
                const NAME: &'static str = $name;
            }
        )*
    };
}

scalar_value! {
    i32 => "int32",
    i64 => "int64",
    f32 => "float32",
    f64 => "float64",
}

impl Value for () {
    const NAME: &'static str = "none";

    fn fmt_value(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("None")
    }
}

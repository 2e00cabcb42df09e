use serde::{Deserialize, Deserializer};

/// A single field of a partial update.
///
/// Plain `Option` cannot tell "leave this alone" apart from "clear this", so
/// each field of an update request carries one of these instead. Used with
/// `#[serde(default)]`, a field missing from the JSON body deserializes to
/// [`FieldUpdate::Unchanged`], an explicit `null` to [`FieldUpdate::Cleared`],
/// and anything else to [`FieldUpdate::Set`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Unchanged,
    Cleared,
    Set(T),
}

impl<'de, T> Deserialize<'de> for FieldUpdate<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Only reached when the field is present at all.
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Self::Set(value),
            None => Self::Cleared,
        })
    }
}

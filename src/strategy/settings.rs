//! Runtime strategy configuration.
//!
//! Each strategy declares a static table of its tunable fields via the
//! [`configurable!`] macro; operators read and write them by name through
//! the registry, with string values coerced to the declared type and
//! unconvertible input rejected.

use crate::strategy::StrategyRole;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Long,
    Double,
    Float,
    Boolean,
    Text,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Integer => "integer",
            FieldKind::Long => "long",
            FieldKind::Double => "double",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Text => "string",
        };

        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no strategy active for role {0}")]
    RoleDisabled(StrategyRole),
    #[error("unknown field {0}")]
    UnknownField(String),
    #[error("cannot convert {value:?} to {kind} for field {field}")]
    Unconvertible {
        field: String,
        kind: FieldKind,
        value: String,
    },
}

/// Name-indexed access to a strategy's tunable fields. The default impl
/// exposes nothing; [`configurable!`] generates the real tables.
pub trait Configurable {
    fn fields(&self) -> &'static [FieldDef] {
        &[]
    }

    fn get_field(&self, _name: &str) -> Option<String> {
        None
    }

    fn set_field(&mut self, name: &str, _raw: &str) -> Result<(), SettingsError> {
        Err(SettingsError::UnknownField(name.to_owned()))
    }
}

macro_rules! field_type {
    (Integer) => { i32 };
    (Long) => { i64 };
    (Double) => { f64 };
    (Float) => { f32 };
    (Boolean) => { bool };
    (Text) => { String };
}
pub(crate) use field_type;

/// Implements [`Configurable`] for a strategy from a `field: Kind` table.
/// A declared kind that does not match the field's actual type fails to
/// compile, so the table cannot drift from the struct.
macro_rules! configurable {
    ($ty:ty { $($field:ident: $kind:ident),* $(,)? }) => {
        impl $crate::strategy::settings::Configurable for $ty {
            fn fields(&self) -> &'static [$crate::strategy::settings::FieldDef] {
                &[$($crate::strategy::settings::FieldDef {
                    name: stringify!($field),
                    kind: $crate::strategy::settings::FieldKind::$kind,
                }),*]
            }

            fn get_field(&self, name: &str) -> Option<String> {
                match name {
                    $(stringify!($field) => Some(self.$field.to_string()),)*
                    _ => None,
                }
            }

            fn set_field(
                &mut self,
                name: &str,
                raw: &str,
            ) -> Result<(), $crate::strategy::settings::SettingsError> {
                match name {
                    $(stringify!($field) => {
                        let parsed = raw
                            .trim()
                            .parse::<$crate::strategy::settings::field_type!($kind)>()
                            .map_err(|_| $crate::strategy::settings::SettingsError::Unconvertible {
                                field: name.to_owned(),
                                kind: $crate::strategy::settings::FieldKind::$kind,
                                value: raw.to_owned(),
                            })?;
                        self.$field = parsed;
                        Ok(())
                    })*
                    _ => Err($crate::strategy::settings::SettingsError::UnknownField(
                        name.to_owned(),
                    )),
                }
            }
        }
    };
}
pub(crate) use configurable;

use std::fmt;

use crate::error::{CodecError, Result};
use crate::types::{RestoreFn, SubstituteFn, TypeDef};
use crate::value::{Object, Value};

/// Which hook failed in a [`CodecError::HookInvocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Substitute,
    Restore,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Substitute => f.write_str("substitution"),
            HookKind::Restore => f.write_str("restoring"),
        }
    }
}

/// Capability set of a type, probed once when its cache entry is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookProfile {
    None,
    SubstituteOnly,
    RestoreOnly,
    Both,
}

impl HookProfile {
    pub fn probe(def: &TypeDef) -> Self {
        match (def.substitute_hook().is_some(), def.restore_hook().is_some()) {
            (false, false) => HookProfile::None,
            (true, false) => HookProfile::SubstituteOnly,
            (false, true) => HookProfile::RestoreOnly,
            (true, true) => HookProfile::Both,
        }
    }

    pub fn substitutes(self) -> bool {
        matches!(self, HookProfile::SubstituteOnly | HookProfile::Both)
    }

    pub fn restores(self) -> bool {
        matches!(self, HookProfile::RestoreOnly | HookProfile::Both)
    }

    pub fn is_none(self) -> bool {
        self == HookProfile::None
    }
}

/// Hook handles of one type.
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) substitute: Option<SubstituteFn>,
    pub(crate) restore: Option<RestoreFn>,
}

impl Hooks {
    pub(crate) fn of(def: &TypeDef) -> Self {
        Hooks {
            substitute: def.substitute_hook().cloned(),
            restore: def.restore_hook().cloned(),
        }
    }

    pub(crate) fn substitute(&self, type_name: &str, value: &Object) -> Result<Option<Value>> {
        let Some(hook) = &self.substitute else {
            return Ok(None);
        };
        hook(value)
            .map(Some)
            .map_err(|source| CodecError::HookInvocation {
                type_name: type_name.to_string(),
                hook: HookKind::Substitute,
                source,
            })
    }

    pub(crate) fn restore(&self, type_name: &str, value: Object) -> Result<Value> {
        let Some(hook) = &self.restore else {
            return Ok(Value::Object(value));
        };
        hook(value).map_err(|source| CodecError::HookInvocation {
            type_name: type_name.to_string(),
            hook: HookKind::Restore,
            source,
        })
    }
}

//! Lookup of entities whose key is a single field on some deployments and composite on others.

use std::{fmt::Display, future::Future};

use tracing::{debug, warn};

use crate::gateway::{EntityKey, KeyField};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyResolutionStrategy {
    primary: KeyField,
    secondary: Option<KeyField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub key: EntityKey,
    pub fell_back: bool,
}

impl KeyResolutionStrategy {
    /// A blank secondary value counts as not supplied.
    pub fn new(primary: KeyField, secondary: Option<KeyField>) -> Self {
        Self {
            primary,
            secondary: secondary.filter(|field| !field.is_blank()),
        }
    }

    pub fn has_fallback(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn composite_key(&self) -> EntityKey {
        let mut fields = vec![self.primary.clone()];
        fields.extend(self.secondary.clone());
        EntityKey::new(fields)
    }

    pub fn reduced_key(&self) -> EntityKey {
        EntityKey::new(vec![self.primary.clone()])
    }

    /// Tries the composite key, then exactly once the primary field alone.
    ///
    /// When both attempts fail the reduced-key error is returned; the composite-key error is
    /// only logged.
    pub async fn resolve<T, E, F, Fut>(&self, mut lookup: F) -> Result<Resolved<T>, E>
    where
        E: Display,
        F: FnMut(EntityKey) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let composite = self.composite_key();
        let first_err = match lookup(composite.clone()).await {
            Ok(value) => {
                return Ok(Resolved {
                    value,
                    key: composite,
                    fell_back: false,
                })
            }
            Err(err) if !self.has_fallback() => return Err(err),
            Err(err) => err,
        };

        let reduced = self.reduced_key();
        warn!(
            composite = %composite,
            reduced = %reduced,
            error = %first_err,
            "key resolution: composite lookup failed; retrying with reduced key"
        );
        let value = lookup(reduced.clone()).await?;
        debug!(key = %reduced, "key resolution: reduced key resolved");
        Ok(Resolved {
            value,
            key: reduced,
            fell_back: true,
        })
    }
}

#[cfg(test)]
#[path = "tests/key_resolution_tests.rs"]
mod tests;

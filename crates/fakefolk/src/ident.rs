use std::fmt;

use uuid::Uuid;

/// Namespace for identity ids. The host derives its own offline ids under a
/// different namespace, so a synthetic identity and a real participant with the
/// same name never share an id.
pub const IDENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_2c0e_93b4_4d57_8e21_5f0c_b7d9_4a63);

/// Stable identifier of a synthetic identity, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(pub Uuid);

impl IdentityId {
    /// Derive the id for `name`. Pure and deterministic: the same name maps to
    /// the same id in every process.
    pub fn derive(name: &str) -> Self {
        Self(Uuid::new_v3(&IDENTITY_NAMESPACE, name.as_bytes()))
    }

    pub fn as_u128(self) -> u128 {
        self.0.as_u128()
    }

    pub fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One-shot token that links an in-flight session to its pending identity.
///
/// Carried in the login hello's profile-id field and consumed by the host's
/// authentication step.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey(pub u128);

impl CorrelationKey {
    pub fn mint() -> Result<Self, getrandom::Error> {
        let mut b = [0u8; 16];
        getrandom::getrandom(&mut b)?;
        Ok(Self(u128::from_be_bytes(b)))
    }

    pub fn short(self) -> u64 {
        (self.0 as u64) ^ ((self.0 >> 64) as u64)
    }
}

// Keys are bearer tokens until consumed; keep them out of logs.
impl fmt::Debug for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationKey({:04x}..)", self.short() & 0xffff)
    }
}

/// Non-owning handle to the host's live entity for a promoted identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostEntityRef(pub u64);

impl fmt::Display for HostEntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

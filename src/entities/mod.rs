// Entity Models
// Identity persists (UUID v5 of the canonical name), aliases are values that map onto it

pub mod bank;

pub use bank::{AdoptionFlags, AliasMatch, BankIdentity, BankRegistry, NormalizedName, Resolution};

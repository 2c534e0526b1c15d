//! Per-call option flags.
//!
//! Modeled as a set of a closed enum rather than a bitfield: no ordering
//! between flags matters, and the type system forbids inventing a flag
//! that doesn't exist. See the "Flag set" design note.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    PrintAcl,
    PrintAvu,
    CalculateChecksum,
    PrintChecksum,
    PrintContents,
    PrintReplicate,
    PrintSize,
    PrintTimestamp,
    Recursive,
    Force,
    SearchCollections,
    SearchObjects,
    SingleServer,
    PrintRaw,
    AddAvu,
    RemoveAvu,
}

#[derive(Debug, Clone, Default)]
pub struct OptionFlags(HashSet<Flag>);

impl OptionFlags {
    pub fn new() -> Self {
        OptionFlags(HashSet::new())
    }

    pub fn with(mut self, flag: Flag) -> Self {
        self.0.insert(flag);
        self
    }

    pub fn set(&mut self, flag: Flag) {
        self.0.insert(flag);
    }

    pub fn has(&self, flag: Flag) -> bool {
        self.0.contains(&flag)
    }

    /// Folds `other`'s flags into `self`. Used to start a per-call flag
    /// set from the process-wide defaults before OR-ing in the flags
    /// derived from one envelope's `arguments`.
    pub fn merge(&mut self, other: &OptionFlags) {
        self.0.extend(other.0.iter().copied());
    }
}

//! Update lists and the updating VM.
//!
//! The append pass leaves behind a tree of [`UpdateList`]s. Revalidation walks
//! it in registration order and evaluates an entry only when its tag moved past
//! the revision the entry was last validated at. A [`CacheGroup`] whose tag has
//! not moved is skipped together with everything nested in it.

use std::cell::Cell;
use std::fmt::Write as _;

use crate::error::VmError;
use crate::host::Environment;
use crate::revision::Revision;
use crate::tag::{self, Tag};

/// A long-lived effect registered during the append pass.
pub trait UpdatingOpcode {
    fn kind(&self) -> &'static str;

    fn tag(&self) -> Tag;

    fn evaluate(&self, vm: &mut UpdatingVm<'_>) -> Result<(), VmError>;

    /// Arguments shown by [`UpdateList::dump`].
    fn describe(&self) -> Vec<String> {
        Vec::new()
    }

    fn nested(&self) -> Option<&UpdateList> {
        None
    }
}

struct UpdateEntry {
    guid: u32,
    opcode: Box<dyn UpdatingOpcode>,
    validated_at: Cell<Revision>,
}

/// Ordered updating opcodes of one region. Sealed once the region commits.
#[derive(Default)]
pub struct UpdateList {
    entries: Vec<UpdateEntry>,
}

impl UpdateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, guid: u32, opcode: Box<dyn UpdatingOpcode>, validated_at: Revision) {
        self.entries.push(UpdateEntry {
            guid,
            opcode,
            validated_at: Cell::new(validated_at),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no entry's tag has moved past the revision it was validated at.
    pub fn is_current(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| entry.opcode.tag().value() <= entry.validated_at.get())
    }

    /// Changes whenever any entry's tag does.
    pub fn tag(&self) -> Tag {
        tag::combine(self.entries.iter().map(|entry| entry.opcode.tag()))
    }

    /// Kinds of the top-level entries, in registration order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.opcode.kind()).collect()
    }

    /// Total entries, nested lists included.
    pub fn deep_len(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| 1 + entry.opcode.nested().map_or(0, UpdateList::deep_len))
            .sum()
    }

    /// Indented listing of `#guid Kind args` lines.
    pub fn dump(&self) -> String {
        let mut output = String::new();
        self.dump_into(&mut output, 0);
        output
    }

    fn dump_into(&self, output: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        for entry in &self.entries {
            let _ = write!(output, "{indent}#{} {}", entry.guid, entry.opcode.kind());
            let args = entry.opcode.describe();
            if !args.is_empty() {
                let _ = write!(output, " {}", args.join(" "));
            }
            output.push('\n');
            if let Some(nested) = entry.opcode.nested() {
                nested.dump_into(output, depth + 1);
            }
        }
    }
}

/// A nested update list plus hooks that run after it whenever it is entered.
pub struct CacheGroup {
    list: UpdateList,
    on_modified: Vec<Box<dyn UpdatingOpcode>>,
    tag: Tag,
}

impl CacheGroup {
    pub fn new(list: UpdateList, on_modified: Vec<Box<dyn UpdatingOpcode>>) -> Self {
        let tag = list.tag();
        Self {
            list,
            on_modified,
            tag,
        }
    }
}

impl UpdatingOpcode for CacheGroup {
    fn kind(&self) -> &'static str {
        "CacheGroup"
    }

    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn evaluate(&self, vm: &mut UpdatingVm<'_>) -> Result<(), VmError> {
        vm.execute(&self.list)?;
        for hook in &self.on_modified {
            vm.notify(hook.as_ref())?;
        }
        Ok(())
    }

    fn describe(&self) -> Vec<String> {
        self.on_modified
            .iter()
            .map(|hook| format!("then:{}", hook.kind()))
            .collect()
    }

    fn nested(&self) -> Option<&UpdateList> {
        Some(&self.list)
    }
}

/// Counters for one revalidation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RevalidationReport {
    /// Leaf updating opcodes that ran.
    pub evaluated: usize,
    /// Entries whose tag had not moved, groups counted once.
    pub skipped: usize,
    pub groups_entered: usize,
    /// Did-modify hooks that ran after an entered group.
    pub notifications: usize,
}

pub struct UpdatingVm<'a> {
    env: &'a mut dyn Environment,
    report: RevalidationReport,
}

impl<'a> UpdatingVm<'a> {
    pub fn new(env: &'a mut dyn Environment) -> Self {
        Self {
            env,
            report: RevalidationReport::default(),
        }
    }

    pub fn env(&mut self) -> &mut dyn Environment {
        &mut *self.env
    }

    /// Walks `list` in registration order.
    ///
    /// An entry that fails leaves its validation revision untouched and aborts
    /// the walk. Entries evaluated before it keep their effects.
    pub fn execute(&mut self, list: &UpdateList) -> Result<(), VmError> {
        for entry in &list.entries {
            let revision = entry.opcode.tag().value();
            if revision <= entry.validated_at.get() {
                self.report.skipped += 1;
                log::trace!(
                    "skip #{} {} ({revision} <= {})",
                    entry.guid,
                    entry.opcode.kind(),
                    entry.validated_at.get()
                );
                continue;
            }
            if entry.opcode.nested().is_some() {
                self.report.groups_entered += 1;
            } else {
                self.report.evaluated += 1;
            }
            entry.opcode.evaluate(self)?;
            entry.validated_at.set(revision);
        }
        Ok(())
    }

    pub(crate) fn notify(&mut self, hook: &dyn UpdatingOpcode) -> Result<(), VmError> {
        self.report.notifications += 1;
        hook.evaluate(self)
    }

    pub fn report(&self) -> RevalidationReport {
        self.report
    }
}

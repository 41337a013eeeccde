use crate::catalog::RoutineId;
use crate::target::hooks::{Datum, FrameId};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Interpreter internal variables, never shown to a debugger client.
fn is_hidden(name: &str) -> bool {
    static TXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^txt\d+$").expect("must compile"));

    matches!(
        name,
        "found" | "rowcount" | "sqlcode" | "sqlerrm" | "_found" | "_rowcount"
    ) || TXT_RE.is_match(name)
}

/// Per-frame symbol bookkeeping, completed lazily at the first stop in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbols {
    visible: Vec<bool>,
    unique: Vec<bool>,
}

impl Symbols {
    pub fn complete(datums: &[Datum]) -> Self {
        let visible: Vec<bool> = datums.iter().map(|d| !is_hidden(&d.name)).collect();
        let counts: HashMap<&str, usize> = datums
            .iter()
            .zip(&visible)
            .filter(|(_, visible)| **visible)
            .map(|(d, _)| d.name.as_str())
            .counts();
        let unique = datums
            .iter()
            .map(|d| counts.get(d.name.as_str()).copied().unwrap_or(0) <= 1)
            .collect();
        Self { visible, unique }
    }

    pub fn is_visible(&self, datum: usize) -> bool {
        self.visible.get(datum).copied().unwrap_or(false)
    }

    pub fn is_unique(&self, datum: usize) -> bool {
        self.unique.get(datum).copied().unwrap_or(true)
    }
}

/// Debugger state of one routine invocation.
#[derive(Debug)]
pub struct FrameState {
    pub routine: RoutineId,
    /// Breakpoints may fire in this frame.
    pub debugged: bool,
    /// Stop at the next statement of this frame.
    pub stepping: bool,
    /// No statement of this invocation has been executed yet.
    pub at_entry: bool,
    pub symbols: Option<Symbols>,
}

/// Frames of active invocations, innermost last. Frames are always created and destroyed
/// in stack order, so an arena index is also the depth of the frame.
#[derive(Default)]
pub struct FrameArena {
    frames: Vec<FrameState>,
}

impl FrameArena {
    pub fn push(&mut self, routine: RoutineId, debugged: bool, stepping: bool) -> FrameId {
        self.frames.push(FrameState {
            routine,
            debugged,
            stepping,
            at_entry: true,
            symbols: None,
        });
        FrameId(self.frames.len() - 1)
    }

    /// Remove the innermost frame (and any frame above `id` left by an unbalanced caller).
    pub fn pop(&mut self, id: FrameId) -> Option<FrameState> {
        if id.0 >= self.frames.len() {
            return None;
        }
        self.frames.truncate(id.0 + 1);
        self.frames.pop()
    }

    pub fn get(&self, id: FrameId) -> Option<&FrameState> {
        self.frames.get(id.0)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut FrameState> {
        self.frames.get_mut(id.0)
    }

    pub fn innermost_mut(&mut self) -> Option<&mut FrameState> {
        self.frames.last_mut()
    }

    /// Translate interpreter frame level (0 is innermost) into an arena index.
    pub fn by_level(&self, level: usize) -> Option<FrameId> {
        self.frames
            .len()
            .checked_sub(level + 1)
            .map(FrameId)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FrameState> {
        self.frames.iter_mut()
    }

    pub fn any_stepping(&self) -> bool {
        self.frames.iter().any(|f| f.stepping)
    }
}

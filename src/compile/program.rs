use crate::layout::schema::{StageKind, TableId};

/// Tag written into a program entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ProgramTag {
    /// Real program for an enabled stage.
    Stage(StageKind),
    /// Placeholder keeping the table shape; references no data.
    Skip,
}

impl ProgramTag {
    /// Firmware value of the tag.
    pub fn raw(self) -> u32 {
        match self {
            Self::Stage(s) => s.tag(),
            Self::Skip => 0,
        }
    }
}

/// Positional descriptor of one program table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Program {
    /// Stage tag or skip.
    pub tag: ProgramTag,
    /// Owning table.
    pub table: TableId,
    /// Entry index inside the table.
    pub index: u32,
    /// Command byte length, `0` for skip entries.
    pub length: u32,
    /// Offset of the command data inside its region.
    pub base_offset: u32,
}

impl Program {
    /// `true` for skip entries.
    pub fn is_skip(&self) -> bool {
        self.tag == ProgramTag::Skip
    }
}

/// Set of stages enabled for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "Vec<StageKind>", into = "Vec<StageKind>")]
pub struct StageSet(u32);

impl StageSet {
    /// No stage enabled.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every stage enabled.
    pub fn all() -> Self {
        StageKind::ALL.into_iter().collect()
    }

    fn bit(stage: StageKind) -> u32 {
        1 << (stage.tag() - 1)
    }

    /// Builder form of [`StageSet::insert`].
    pub fn with(mut self, stage: StageKind) -> Self {
        self.insert(stage);
        self
    }

    /// Builder form of [`StageSet::remove`].
    pub fn without(mut self, stage: StageKind) -> Self {
        self.remove(stage);
        self
    }

    /// Enable `stage`.
    pub fn insert(&mut self, stage: StageKind) {
        self.0 |= Self::bit(stage);
    }

    /// Disable `stage`.
    pub fn remove(&mut self, stage: StageKind) {
        self.0 &= !Self::bit(stage);
    }

    /// `true` if `stage` is enabled.
    pub fn contains(self, stage: StageKind) -> bool {
        self.0 & Self::bit(stage) != 0
    }

    /// Number of enabled stages.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// `true` if nothing is enabled.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Enabled stages in tag order.
    pub fn iter(self) -> impl Iterator<Item = StageKind> {
        StageKind::ALL.into_iter().filter(move |&s| self.contains(s))
    }
}

impl FromIterator<StageKind> for StageSet {
    fn from_iter<I: IntoIterator<Item = StageKind>>(iter: I) -> Self {
        let mut set = Self::empty();
        for s in iter {
            set.insert(s);
        }
        set
    }
}

impl From<Vec<StageKind>> for StageSet {
    fn from(v: Vec<StageKind>) -> Self {
        v.into_iter().collect()
    }
}

impl From<StageSet> for Vec<StageKind> {
    fn from(s: StageSet) -> Self {
        s.iter().collect()
    }
}

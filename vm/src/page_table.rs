/// One virtual page of a process. A mapped page is resident in a frame,
/// swapped out to a block, or both when a clean disk copy still exists
/// for a resident page. At least one of the two is always set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub frame: Option<u32>,
    pub block: Option<u32>,
    pub dirty: bool,
    pub referenced: bool,
}

impl PageTableEntry {
    /// Fresh entry for a page just placed in `frame`.
    pub(crate) fn resident_in(frame: u32) -> Self {
        Self {
            frame: Some(frame),
            block: None,
            dirty: false,
            referenced: true,
        }
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// The page was resident; no fault.
    Hit { frame: u32 },
    /// The page was swapped out and has been brought into `frame`.
    Fault { frame: u32 },
}

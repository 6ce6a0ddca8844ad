//! Machine snapshots.
//!
//! A snapshot is a header (magic, format version, a screenshot of the
//! moment it was taken, a timestamp and the payload size) followed by the
//! serialized component state. All multi-byte fields are big-endian; the
//! version triple must match exactly on load.

use emu_core::{SnapshotReader, SnapshotWriter};

/// Snapshot file magic.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"VC64";

/// Format version.
pub const V_MAJOR: u8 = 1;
pub const V_MINOR: u8 = 0;
pub const V_SUBMINOR: u8 = 0;

/// A captured machine state.
pub struct Snapshot {
    major: u8,
    minor: u8,
    subminor: u8,
    screenshot_width: u32,
    screenshot_height: u32,
    /// RGBA screenshot of the frame visible at capture time.
    screenshot: Vec<u8>,
    /// Seconds since the Unix epoch at capture time.
    timestamp: u64,
    /// Serialized component state.
    data: Vec<u8>,
}

impl Snapshot {
    /// Wrap serialized component state in a snapshot.
    #[must_use]
    pub fn new(
        screenshot_width: u32,
        screenshot_height: u32,
        screenshot: Vec<u8>,
        timestamp: u64,
        data: Vec<u8>,
    ) -> Self {
        debug_assert_eq!(
            screenshot.len(),
            (screenshot_width * screenshot_height * 4) as usize
        );
        Self {
            major: V_MAJOR,
            minor: V_MINOR,
            subminor: V_SUBMINOR,
            screenshot_width,
            screenshot_height,
            screenshot,
            timestamp,
            data,
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn screenshot(&self) -> (u32, u32, &[u8]) {
        (
            self.screenshot_width,
            self.screenshot_height,
            &self.screenshot,
        )
    }

    /// Whether this snapshot was written by the current format version.
    #[must_use]
    pub fn is_compatible(&self) -> bool {
        (self.major, self.minor, self.subminor) == (V_MAJOR, V_MINOR, V_SUBMINOR)
    }

    /// Serialize to the interchange byte format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = SnapshotWriter::with_capacity(
            4 + 3 + 8 + self.screenshot.len() + 8 + 4 + self.data.len(),
        );
        w.write_bytes(SNAPSHOT_MAGIC);
        w.write_u8(self.major);
        w.write_u8(self.minor);
        w.write_u8(self.subminor);
        w.write_u32(self.screenshot_width);
        w.write_u32(self.screenshot_height);
        w.write_bytes(&self.screenshot);
        w.write_u64(self.timestamp);
        w.write_u32(self.data.len() as u32);
        w.write_bytes(&self.data);
        w.into_bytes()
    }

    /// Parse the interchange byte format. The version is parsed but not
    /// enforced here; callers check `is_compatible` so they can report the
    /// mismatch distinctly from corruption.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        let mut r = SnapshotReader::new(bytes);
        let mut magic = [0u8; 4];
        r.read_bytes(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err("not a snapshot file");
        }
        let major = r.read_u8()?;
        let minor = r.read_u8()?;
        let subminor = r.read_u8()?;
        let screenshot_width = r.read_u32()?;
        let screenshot_height = r.read_u32()?;
        let pixels = (screenshot_width as usize)
            .checked_mul(screenshot_height as usize)
            .and_then(|p| p.checked_mul(4))
            .ok_or("snapshot screenshot too large")?;
        if pixels > r.remaining() {
            return Err("snapshot truncated");
        }
        let screenshot = r.read_vec(pixels)?;
        let timestamp = r.read_u64()?;
        let data_size = r.read_u32()? as usize;
        if data_size != r.remaining() {
            return Err("snapshot size field inconsistent");
        }
        let data = r.read_vec(data_size)?;

        Ok(Self {
            major,
            minor,
            subminor,
            screenshot_width,
            screenshot_height,
            screenshot,
            timestamp,
            data,
        })
    }
}

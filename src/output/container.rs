//! Fragmented packet container
//!
//! Layout:
//!
//! ```text
//! "RRCF" | version u16 | header length u32 | JSON header
//! ( 'P' | track u8 | flags u8 | pts u64 | duration u32 | length u32 | data )*
//! 'T' | packet count u64 | duration u64 | "RRCF"
//! ```
//!
//! All integers are little endian. Every record is self-delimiting, so a file
//! that lost its trailer is still readable up to the last complete record.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::encoder::EncodedPacket;
use crate::error::{RecorderError, RecorderResult};

const MAGIC: &[u8; 4] = b"RRCF";
const VERSION: u16 = 1;
const PACKET_TAG: u8 = b'P';
const TRAILER_TAG: u8 = b'T';
const FLAG_KEYFRAME: u8 = 0x01;

/// Output container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    #[default]
    FragmentedMp4,
    FragmentedMov,
    Mp4,
    Flv,
    Mkv,
    Mov,
    Mpegts,
    Hls,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::FragmentedMp4 | FileFormat::Mp4 => "mp4",
            FileFormat::FragmentedMov | FileFormat::Mov => "mov",
            FileFormat::Flv => "flv",
            FileFormat::Mkv => "mkv",
            FileFormat::Mpegts => "ts",
            FileFormat::Hls => "m3u8",
        }
    }
}

/// Stream description stored at the start of every file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerHeader {
    pub format: FileFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_encoder: String,
    pub audio_encoder: String,
    pub audio_tracks: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Wall clock time the file was created, ms since the Unix epoch
    pub created_at_ms: i64,
}

/// A finished output file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub first_pts_ms: u64,
    pub end_pts_ms: u64,
    pub duration_ms: u64,
    pub packets: u64,
    pub bytes: u64,
}

/// Writes one container file
///
/// The header is flushed on creation. A writer dropped without
/// [`finish`](Self::finish) still writes its trailer.
pub struct ContainerWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    first_pts_ms: Option<u64>,
    end_pts_ms: u64,
    packets: u64,
    bytes: u64,
}

impl ContainerWriter {
    pub fn create(path: impl AsRef<Path>, header: &ContainerHeader) -> RecorderResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| {
            RecorderError::from_output_io(&e, &format!("Failed to create {}", path.display()))
        })?;

        let json = serde_json::to_vec(header)
            .map_err(|e| RecorderError::encoder(format!("Failed to encode header: {}", e)))?;

        let mut out = BufWriter::new(file);
        let mut prefix = Vec::with_capacity(10 + json.len());
        prefix.extend_from_slice(MAGIC);
        prefix.extend_from_slice(&VERSION.to_le_bytes());
        prefix.extend_from_slice(&(json.len() as u32).to_le_bytes());
        prefix.extend_from_slice(&json);

        out.write_all(&prefix)
            .and_then(|_| out.flush())
            .map_err(|e| RecorderError::from_output_io(&e, "Failed to write container header"))?;

        debug!("Container created: {}", path.display());

        Ok(Self {
            path,
            out: Some(out),
            first_pts_ms: None,
            end_pts_ms: 0,
            packets: 0,
            bytes: prefix.len() as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far, header included
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn first_pts_ms(&self) -> Option<u64> {
        self.first_pts_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.first_pts_ms
            .map(|first| self.end_pts_ms.saturating_sub(first))
            .unwrap_or(0)
    }

    pub fn write_packet(&mut self, packet: &EncodedPacket) -> RecorderResult<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| RecorderError::encoder("Container already finished"))?;

        let flags = if packet.keyframe { FLAG_KEYFRAME } else { 0 };
        let mut record = Vec::with_capacity(19);
        record.push(PACKET_TAG);
        record.push(packet.track);
        record.push(flags);
        record.extend_from_slice(&packet.pts_ms.to_le_bytes());
        record.extend_from_slice(&(packet.duration_ms as u32).to_le_bytes());
        record.extend_from_slice(&(packet.data.len() as u32).to_le_bytes());

        out.write_all(&record)
            .and_then(|_| out.write_all(&packet.data))
            .map_err(|e| RecorderError::from_output_io(&e, "Failed to write packet"))?;

        self.first_pts_ms.get_or_insert(packet.pts_ms);
        self.end_pts_ms = self.end_pts_ms.max(packet.end_ms());
        self.packets += 1;
        self.bytes += (record.len() + packet.data.len()) as u64;
        Ok(())
    }

    /// Write the trailer and close the file
    pub fn finish(mut self) -> RecorderResult<SegmentInfo> {
        self.write_trailer()?;
        Ok(SegmentInfo {
            path: self.path.clone(),
            first_pts_ms: self.first_pts_ms.unwrap_or(0),
            end_pts_ms: self.end_pts_ms,
            duration_ms: self.duration_ms(),
            packets: self.packets,
            bytes: self.bytes,
        })
    }

    fn write_trailer(&mut self) -> RecorderResult<()> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };

        let mut trailer = Vec::with_capacity(21);
        trailer.push(TRAILER_TAG);
        trailer.extend_from_slice(&self.packets.to_le_bytes());
        trailer.extend_from_slice(&self.duration_ms().to_le_bytes());
        trailer.extend_from_slice(MAGIC);

        out.write_all(&trailer)
            .and_then(|_| out.flush())
            .and_then(|_| out.get_ref().sync_all())
            .map_err(|e| RecorderError::from_output_io(&e, "Failed to finalize container"))?;

        self.bytes += trailer.len() as u64;
        debug!(
            "Container finalized: {} ({} packets, {}ms)",
            self.path.display(),
            self.packets,
            self.duration_ms()
        );
        Ok(())
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if self.out.is_some() {
            if let Err(e) = self.write_trailer() {
                warn!("Failed to finalize {} on drop: {}", self.path.display(), e);
            }
        }
    }
}

/// What [`probe`] found in a file
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub header: ContainerHeader,
    pub packets: u64,
    pub video_packets: u64,
    pub keyframes: u64,
    pub starts_with_keyframe: bool,
    pub first_pts_ms: u64,
    pub duration_ms: u64,
    /// Audio tracks that carry at least one packet
    pub audio_tracks: Vec<u8>,
    /// Trailer present and consistent with the records
    pub finalized: bool,
}

impl ProbeReport {
    /// Finalized, has video, and decoding can start at the first frame
    pub fn is_playable(&self) -> bool {
        self.finalized && self.video_packets > 0 && self.starts_with_keyframe
    }
}

fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>) -> std::io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

/// Parse a container file and check its structure
pub fn probe(path: impl AsRef<Path>) -> Result<ProbeReport> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut cursor = Cursor::new(bytes.as_slice());

    let magic: [u8; 4] = read_array(&mut cursor).context("File too short for magic")?;
    if &magic != MAGIC {
        bail!("{} is not a recorder container", path.display());
    }
    let version = u16::from_le_bytes(read_array(&mut cursor).context("Missing version")?);
    if version != VERSION {
        bail!("Unsupported container version {}", version);
    }
    let header_len = u32::from_le_bytes(read_array(&mut cursor).context("Missing header length")?);
    let mut header_json = vec![0u8; header_len as usize];
    cursor
        .read_exact(&mut header_json)
        .context("Truncated container header")?;
    let header: ContainerHeader =
        serde_json::from_slice(&header_json).context("Invalid container header")?;

    let mut report = ProbeReport {
        header,
        packets: 0,
        video_packets: 0,
        keyframes: 0,
        starts_with_keyframe: false,
        first_pts_ms: 0,
        duration_ms: 0,
        audio_tracks: Vec::new(),
        finalized: false,
    };
    let mut first_pts = None;
    let mut end_pts = 0u64;

    loop {
        let Ok([tag]) = read_array::<1>(&mut cursor) else {
            break;
        };

        match tag {
            PACKET_TAG => {
                let Ok(fixed) = read_array::<18>(&mut cursor) else {
                    break;
                };
                let track = fixed[0];
                let keyframe = fixed[1] & FLAG_KEYFRAME != 0;
                let pts = u64::from_le_bytes(fixed[2..10].try_into()?);
                let duration = u32::from_le_bytes(fixed[10..14].try_into()?) as u64;
                let len = u32::from_le_bytes(fixed[14..18].try_into()?) as u64;

                let position = cursor.position();
                if position + len > bytes.len() as u64 {
                    break;
                }
                cursor.set_position(position + len);

                if report.packets == 0 {
                    report.starts_with_keyframe = track == 0 && keyframe;
                }
                report.packets += 1;
                if track == 0 {
                    report.video_packets += 1;
                    if keyframe {
                        report.keyframes += 1;
                    }
                } else if !report.audio_tracks.contains(&track) {
                    report.audio_tracks.push(track);
                }
                first_pts.get_or_insert(pts);
                end_pts = end_pts.max(pts + duration);
            }
            TRAILER_TAG => {
                let Ok(trailer) = read_array::<20>(&mut cursor) else {
                    break;
                };
                let count = u64::from_le_bytes(trailer[0..8].try_into()?);
                report.finalized = count == report.packets && &trailer[16..20] == MAGIC;
                break;
            }
            other => bail!("Unknown record tag {:#04x} in {}", other, path.display()),
        }
    }

    report.audio_tracks.sort_unstable();
    report.first_pts_ms = first_pts.unwrap_or(0);
    report.duration_ms = first_pts.map(|first| end_pts - first).unwrap_or(0);
    Ok(report)
}

//! Reads the presentation duration of ISO base media files (MP4, MOV, M4V).
//!
//! Parsing is done by the `mp4` crate on a blocking thread; the movie header
//! (`mvhd`) gives `duration / timescale`. Anything that does not parse as a
//! container gives `None`.

use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    path::Path,
};
use tokio::task::spawn_blocking;

/// Duration in seconds of the video at `path`, if its container declares one.
pub async fn video_duration(path: &Path) -> io::Result<Option<f64>> {
    let path = path.to_owned();
    spawn_blocking(move || read_duration(&path))
        .await
        .map_err(io::Error::other)?
}

fn read_duration(path: &Path) -> io::Result<Option<f64>> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    let reader = ReadBudget {
        inner: BufReader::new(file),
        remaining: len.saturating_mul(2),
    };

    let movie = match mp4::Mp4Reader::read_header(reader, len) {
        Ok(movie) => movie,
        Err(mp4::Error::IoError(err))
            if !matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
            ) =>
        {
            return Err(err);
        }
        Err(_) => return Ok(None),
    };

    let mvhd = &movie.moov.mvhd;
    // all-ones is the "unknown" sentinel for both header versions
    if mvhd.timescale == 0 || mvhd.duration == u64::from(u32::MAX) || mvhd.duration == u64::MAX
    {
        return Ok(None);
    }
    Ok(Some(mvhd.duration as f64 / f64::from(mvhd.timescale)))
}

/// Caps the bytes a parse may read at a multiple of the file length, so a
/// box table that points backwards ends in an error instead of a loop.
struct ReadBudget<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Read for ReadBudget<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "container re-reads more than its own length",
            ));
        }
        let cap = buf
            .len()
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for ReadBudget<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Builders for minimal containers, shared with the other test modules.
#[cfg(test)]
pub(crate) mod fixtures {
    pub fn boxed(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 8);
        out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    pub fn ftyp() -> Vec<u8> {
        boxed(b"ftyp", b"isom\0\0\x02\0isomiso2mp41")
    }

    pub fn mvhd_v0(timescale: u32, duration: u32) -> Vec<u8> {
        let mut payload = vec![0u8; 100];
        payload[12..16].copy_from_slice(&timescale.to_be_bytes());
        payload[16..20].copy_from_slice(&duration.to_be_bytes());
        boxed(b"mvhd", &payload)
    }

    /// `ftyp` + `moov{mvhd}` + a little `mdat`.
    pub fn mp4_with_duration(timescale: u32, duration: u32) -> Vec<u8> {
        let mut file = ftyp();
        file.extend(boxed(b"moov", &mvhd_v0(timescale, duration)));
        file.extend(boxed(b"mdat", &[0u8; 64]));
        file
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::time::Duration;

    async fn probe(bytes: &[u8]) -> Option<f64> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, bytes).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), video_duration(&path))
            .await
            .expect("duration probe did not finish")
            .unwrap()
    }

    /// A 64-bit size header (`size32 == 1`) followed by `largesize`.
    fn large_box(kind: &[u8; 4], largesize: u64) -> Vec<u8> {
        let mut out = 1u32.to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(&largesize.to_be_bytes());
        out
    }

    #[tokio::test]
    async fn reads_version0_duration() {
        assert_eq!(probe(&mp4_with_duration(1000, 12_500)).await, Some(12.5));
    }

    #[tokio::test]
    async fn finds_moov_after_media_data() {
        let mut file = boxed(b"ftyp", b"qt  \0\0\0\0");
        file.extend(boxed(b"mdat", &[7u8; 4096]));
        file.extend(boxed(b"moov", &mvhd_v0(600, 1800)));
        assert_eq!(probe(&file).await, Some(3.0));
    }

    #[tokio::test]
    async fn reads_version1_duration() {
        let mut payload = vec![0u8; 112];
        payload[0] = 1;
        payload[20..24].copy_from_slice(&90_000u32.to_be_bytes());
        payload[24..32].copy_from_slice(&(90_000u64 * 61).to_be_bytes());
        let mut file = ftyp();
        file.extend(boxed(b"moov", &boxed(b"mvhd", &payload)));
        assert_eq!(probe(&file).await, Some(61.0));
    }

    #[tokio::test]
    async fn non_containers_have_no_duration() {
        assert_eq!(probe(b"definitely not a video").await, None);
        assert_eq!(probe(&boxed(b"ftyp", b"isom")).await, None);

        let mut zero_timescale = ftyp();
        zero_timescale.extend(boxed(b"moov", &mvhd_v0(0, 10)));
        assert_eq!(probe(&zero_timescale).await, None);

        let mut unknown = ftyp();
        unknown.extend(boxed(b"moov", &mvhd_v0(1000, u32::MAX)));
        assert_eq!(probe(&unknown).await, None);
    }

    #[tokio::test]
    async fn oversized_64bit_box_is_rejected() {
        let mut file = ftyp();
        file.extend(large_box(b"free", u64::MAX));
        file.extend_from_slice(&[0u8; 16]);
        assert_eq!(probe(&file).await, None);
    }

    #[tokio::test]
    async fn box_size_that_wraps_to_the_start_is_rejected() {
        let mut file = boxed(b"ftyp", b"isom\0\0\0\0");
        assert_eq!(file.len(), 16);
        file.extend(large_box(b"free", u64::MAX - 15));
        file.extend(boxed(b"moov", &mvhd_v0(1000, 1000)));
        assert_eq!(probe(&file).await, None);
    }

    #[tokio::test]
    async fn zero_sized_child_before_mvhd_gives_none() {
        let mut children = 0u32.to_be_bytes().to_vec();
        children.extend_from_slice(b"junk");
        children.extend(mvhd_v0(1000, 1000));
        let mut file = ftyp();
        file.extend(boxed(b"moov", &children));
        assert_eq!(probe(&file).await, None);
    }
}

//! Slide timing for assembled videos

use std::fmt::Write as _;
use std::path::PathBuf;

const SECOND_MS: u64 = 1000;

/// Split `total_ms` across `count` images.
///
/// Shares are whole seconds when the audio allows at least one second per
/// image and whole milliseconds otherwise. Every image gets the same share
/// except the last, which also takes the remainder, so the result always sums
/// to `total_ms`.
pub fn even_split(total_ms: u64, count: usize) -> Vec<u64> {
    if count == 0 {
        return Vec::new();
    }
    let n = count as u64;

    let share = if total_ms >= n * SECOND_MS {
        (total_ms / SECOND_MS / n) * SECOND_MS
    } else {
        total_ms / n
    };

    let mut durations = vec![share; count];
    durations[count - 1] = total_ms - share * (n - 1);
    durations
}

/// One image and how long it stays on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slide {
    pub image: PathBuf,
    pub duration_ms: u64,
}

/// Pair images with their share of `total_ms`.
pub fn slides(images: &[PathBuf], total_ms: u64) -> Vec<Slide> {
    images
        .iter()
        .cloned()
        .zip(even_split(total_ms, images.len()))
        .map(|(image, duration_ms)| Slide { image, duration_ms })
        .collect()
}

fn quote(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

/// Input list for ffmpeg's concat demuxer.
///
/// The demuxer ignores the duration of the last entry, so the last image is
/// listed once more without one.
pub fn concat_manifest(slides: &[Slide]) -> String {
    let mut manifest = String::from("ffconcat version 1.0\n");
    for slide in slides {
        let _ = writeln!(manifest, "file '{}'", quote(&slide.image));
        let _ = writeln!(manifest, "duration {:.3}", slide.duration_ms as f64 / 1000.0);
    }
    if let Some(last) = slides.last() {
        let _ = writeln!(manifest, "file '{}'", quote(&last.image));
    }
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_seconds_over_five_images() {
        assert_eq!(even_split(10_000, 5), vec![2000, 2000, 2000, 2000, 2000]);
    }

    #[test]
    fn remainder_goes_to_last_image() {
        assert_eq!(even_split(11_000, 5), vec![2000, 2000, 2000, 2000, 3000]);
        assert_eq!(even_split(10_500, 5), vec![2000, 2000, 2000, 2000, 2500]);
    }

    #[test]
    fn short_audio_falls_back_to_milliseconds() {
        let durations = even_split(2_500, 4);
        assert_eq!(durations, vec![625, 625, 625, 625]);

        let durations = even_split(1_001, 3);
        assert_eq!(durations, vec![333, 333, 335]);
    }

    #[test]
    fn durations_always_sum_to_total() {
        for total in [0, 1, 999, 1_000, 7_321, 59_999, 3_600_000] {
            for count in 1..12 {
                let durations = even_split(total, count);
                assert_eq!(durations.len(), count);
                assert_eq!(durations.iter().sum::<u64>(), total, "{} over {}", total, count);
                assert!(durations[..count - 1].windows(2).all(|w| w[0] == w[1]));
            }
        }
    }

    #[test]
    fn no_images_no_durations() {
        assert!(even_split(5_000, 0).is_empty());
    }

    #[test]
    fn manifest_repeats_last_image() {
        let images = vec![PathBuf::from("/tmp/a.jpg"), PathBuf::from("/tmp/it's.png")];
        let manifest = concat_manifest(&slides(&images, 3_000));

        assert_eq!(
            manifest,
            "ffconcat version 1.0\n\
             file '/tmp/a.jpg'\nduration 1.000\n\
             file '/tmp/it'\\''s.png'\nduration 2.000\n\
             file '/tmp/it'\\''s.png'\n"
        );
    }
}

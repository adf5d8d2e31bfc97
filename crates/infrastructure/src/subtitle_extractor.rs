//! Concurrent subtitle discovery and extraction: scans a resolved
//! torrent's file list for subtitle-extension side-files, tags each
//! with a detected language, and streams every one of them out of the
//! swarm into the session folder in parallel.
//!
//! A single subtitle failing to extract never fails the session — it
//! is dropped from the result and logged.

use domain::{is_subtitle_extension, language::detect_language, SubtitleDetected, SubtitleExtracted, TorrentFileEntry, TorrentHandle};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Scans `files` for subtitle-extension entries and tags each with a
/// detected language. Order follows the torrent's own file list.
pub fn detect_subtitles(files: &[TorrentFileEntry]) -> Vec<(TorrentFileEntry, SubtitleDetected)> {
    files
        .iter()
        .filter_map(|f| {
            let ext = Path::new(&f.name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if !is_subtitle_extension(&ext) {
                return None;
            }
            let detected = SubtitleDetected {
                name: f.name.clone(),
                ext: ext.clone(),
                size: f.length,
                language: detect_language(&f.name),
            };
            Some((f.clone(), detected))
        })
        .collect()
}

/// Extracts every detected subtitle from `handle` into `dest_dir`,
/// concurrently, as `subtitle_<language>.<ext>`. Subtitles sharing a
/// language get a numeric suffix so none overwrite each other.
/// Extraction failures are swallowed; only successes are returned.
pub async fn extract_all(
    handle: &dyn TorrentHandle,
    dest_dir: &Path,
    detected: &[(TorrentFileEntry, SubtitleDetected)],
) -> Vec<SubtitleExtracted> {
    let mut seen_languages: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let jobs: Vec<_> = detected
        .iter()
        .map(|(file, subtitle)| {
            let count = seen_languages.entry(subtitle.language.clone()).or_insert(0);
            let suffix = *count;
            *count += 1;
            let filename = if suffix == 0 {
                format!("subtitle_{}.{}", subtitle.language, subtitle.ext)
            } else {
                format!("subtitle_{}_{}.{}", subtitle.language, suffix, subtitle.ext)
            };
            let dest_path: PathBuf = dest_dir.join(&filename);
            async move {
                match handle.extract_to_file(file.index, &dest_path).await {
                    Ok(()) => Some(SubtitleExtracted {
                        name: subtitle.name.clone(),
                        path: dest_path.to_string_lossy().into_owned(),
                        language: subtitle.language.clone(),
                        ext: subtitle.ext.clone(),
                        size: subtitle.size,
                    }),
                    Err(e) => {
                        warn!(file = %subtitle.name, error = %e, "subtitle extraction failed, skipping");
                        None
                    }
                }
            }
        })
        .collect();

    join_all(jobs).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> TorrentFileEntry {
        TorrentFileEntry { index: 0, name: name.to_string(), length: 1024 }
    }

    #[test]
    fn detects_only_subtitle_extensions() {
        let files = vec![entry("movie.mp4"), entry("movie.english.srt"), entry("readme.txt")];
        let detected = detect_subtitles(&files);
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].1.language, "eng");
    }

    #[test]
    fn detection_is_case_insensitive_on_extension() {
        let files = vec![entry("movie.French.SRT")];
        let detected = detect_subtitles(&files);
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].1.ext, "srt");
        assert_eq!(detected[0].1.language, "fra");
    }
}

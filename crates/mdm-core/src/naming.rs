//! Final artifact naming: filename template plus sanitization.

use std::path::{Path, PathBuf};

use crate::task::{StreamRefs, Task, TaskId};

/// Linux NAME_MAX minus room for the extension.
const STEM_MAX: usize = 250;

/// Substitutes `{title}`, `{id}` and `{platform}` in `template`.
pub fn apply_template(template: &str, title: &str, id: TaskId, platform: &str) -> String {
    template
        .replace("{title}", title)
        .replace("{id}", &id.to_string())
        .replace("{platform}", platform)
}

/// Makes a name safe as a single path component.
///
/// - Replaces path separators, `: * ? " < > |` and control characters with `_`
/// - Trims leading/trailing spaces and dots
/// - Limits length to 250 bytes on a char boundary
pub fn sanitize_filename(name: &str) -> String {
    let out: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = out.trim_matches(|c: char| c == ' ' || c == '.');
    if trimmed.len() > STEM_MAX {
        let mut take = STEM_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Container extension: `.m4a` when only audio is present, else `.mp4`.
pub fn extension_for(streams: &StreamRefs) -> &'static str {
    if streams.video.is_none() && streams.audio.is_some() {
        "m4a"
    } else {
        "mp4"
    }
}

/// Final output path for `task` inside `target_dir`.
pub fn output_path(task: &Task, template: &str, target_dir: &Path) -> PathBuf {
    let mut stem = sanitize_filename(&apply_template(template, &task.title, task.id, &task.platform));
    if stem.is_empty() {
        stem = format!("task-{}", task.id);
    }
    target_dir.join(format!("{}.{}", stem, extension_for(&task.streams)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Progress, TaskSettings, TaskStatus};

    fn task(title: &str, streams: StreamRefs) -> Task {
        Task {
            id: 12,
            title: title.to_string(),
            platform: "bilibili".to_string(),
            target_dir: PathBuf::from("/media"),
            streams,
            status: TaskStatus::Running,
            progress: Progress::default(),
            settings: TaskSettings::default(),
            created_at: 0,
            updated_at: 0,
            output_path: None,
            last_error: None,
        }
    }

    fn av() -> StreamRefs {
        StreamRefs {
            video: Some("v".into()),
            audio: Some("a".into()),
        }
    }

    #[test]
    fn template_substitution() {
        assert_eq!(apply_template("{title}-{id}", "Clip", 7, "yt"), "Clip-7");
        assert_eq!(apply_template("[{platform}] {title}", "Clip", 7, "yt"), "[yt] Clip");
    }

    #[test]
    fn unsafe_characters_replaced() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
    }

    #[test]
    fn trims_dots_and_spaces() {
        assert_eq!(sanitize_filename("  ..  My Video  ..  "), "My Video");
    }

    #[test]
    fn long_names_truncate_on_char_boundary() {
        let name = "é".repeat(200);
        let out = sanitize_filename(&name);
        assert!(out.len() <= STEM_MAX);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn output_path_uses_extension_by_streams() {
        let t = task("A/B", av());
        assert_eq!(
            output_path(&t, "{title}-{id}", Path::new("/media")),
            PathBuf::from("/media/A_B-12.mp4")
        );
        let audio_only = task(
            "Song",
            StreamRefs {
                video: None,
                audio: Some("a".into()),
            },
        );
        assert_eq!(
            output_path(&audio_only, "{title}", Path::new("/media")),
            PathBuf::from("/media/Song.m4a")
        );
    }

    #[test]
    fn empty_name_falls_back_to_id() {
        let t = task("...", av());
        assert_eq!(
            output_path(&t, "{title}", Path::new("/m")),
            PathBuf::from("/m/task-12.mp4")
        );
    }
}

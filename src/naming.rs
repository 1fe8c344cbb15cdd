use crate::config::GearManifest;

/// Canonical directory name for an extracted DICOM series.
///
/// Strips `.dicom`/`.zip` and rewrites every run of separators (spaces,
/// underscores, hyphens): a run holding a hyphen padded on both sides, as in
/// `" - "` or `"_-_"`, becomes `-`; any other run containing whitespace
/// becomes `_`; the rest are kept as-is.
pub fn dicom_unzip_name(name: &str) -> String {
    let stripped = name.replace(".dicom", "").replace(".zip", "");
    let mut clean = String::with_capacity(stripped.len());
    let mut run = String::new();
    for ch in stripped.chars() {
        if is_separator(ch) {
            run.push(ch);
            continue;
        }
        push_run(&mut clean, &run);
        run.clear();
        clean.push(ch);
    }
    push_run(&mut clean, &run);
    clean
}

fn is_separator(ch: char) -> bool {
    ch == '_' || ch == '-' || ch.is_whitespace()
}

fn push_run(out: &mut String, run: &str) {
    if run.is_empty() {
        return;
    }
    let chars: Vec<char> = run.chars().collect();
    let padded_hyphen = (1..chars.len().saturating_sub(1)).any(|i| chars[i] == '-');
    if padded_hyphen {
        out.push('-');
    } else if run.chars().any(char::is_whitespace) {
        out.push('_');
    } else {
        out.push_str(run);
    }
}

/// `<identifier>_<sub_label>_<dest_id>.zip`
pub fn zip_save_name(identifier: &str, sub_label: &str, dest_id: &str) -> String {
    format!("{identifier}_{sub_label}_{dest_id}.zip")
}

/// `<label>:<version>` as used for subject tags.
pub fn gear_name(manifest: &GearManifest) -> String {
    format!("{}:{}", manifest.label, manifest.version)
}

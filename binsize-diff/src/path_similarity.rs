//! Decides whether two paths of libs, compilands or source files from different builds probably
//! name the same thing.
//!
//! Builds of the same code often happen in different enlistment roots, so `p:\os\src\a\b.obj` and
//! `w:\dd\root2\src\a\b.obj` need to match, as do `c:\x\before\foo.lib` and `c:\x\after\foo.lib`.
//! The first kind is caught by comparing backwards from the file name, the second by edit distance.

const BACKWARDS_MATCH_THRESHOLD: f64 = 0.8;
const LEVENSHTEIN_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Case-insensitive file name equality is required. After that, the paths match if enough
/// characters agree when walking backwards from the file name, or if they're close in edit
/// distance.
#[must_use]
pub fn path_names_are_very_similar(first: &str, second: &str) -> bool {
    let first_file_name = file_name(first);
    let second_file_name = file_name(second);
    if !first_file_name.eq_ignore_ascii_case(second_file_name) {
        return false;
    }

    let first = first.to_lowercase();
    let second = second.to_lowercase();
    let first_chars: Vec<char> = first.chars().collect();
    let second_chars: Vec<char> = second.chars().collect();

    // The file names are known to be equal, so they count as matching characters. The walk starts
    // one past the separator and stops before index 0.
    let file_name_len = first_file_name.chars().count();
    let mut same = file_name_len;
    let mut different = 0_usize;
    let mut i = first_chars.len() as isize - 1 - file_name_len as isize;
    let mut j = second_chars.len() as isize - 1 - file_name_len as isize;
    while i > 0 && j > 0 {
        if first_chars[i as usize] == second_chars[j as usize] {
            same += 1;
        } else {
            different += 1;
        }
        i -= 1;
        j -= 1;
    }

    let backwards_ratio = if same + different == 0 {
        0.0
    } else {
        same as f64 / (same + different) as f64
    };

    backwards_ratio >= BACKWARDS_MATCH_THRESHOLD
        || levenshtein_similarity(&first, &second) >= LEVENSHTEIN_SIMILARITY_THRESHOLD
}

/// 1.0 for identical strings, 0.0 when either is empty.
#[must_use]
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b)
}

fn file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

//! Aggregation: fold unit outcomes back into one result per file.
//!
//! Outcomes arrive in completion order; they are grouped by file and sorted
//! by page here, so the combined Markdown always follows page order no
//! matter which call finished first.

use crate::config::PageSeparator;
use crate::job::IntakeFile;
use crate::output::FileResult;
use crate::pipeline::invoke::UnitOutcome;

/// One [`FileResult`] per intake file, in intake order.
///
/// A file succeeds only if every one of its units succeeded. Otherwise its
/// error is the message of its lowest-numbered failing page.
pub fn aggregate(
    files: &[IntakeFile],
    outcomes: Vec<UnitOutcome>,
    separator: &PageSeparator,
) -> Vec<FileResult> {
    let mut per_file: Vec<Vec<UnitOutcome>> = files.iter().map(|_| Vec::new()).collect();
    for outcome in outcomes {
        if let Some(bucket) = per_file.get_mut(outcome.file_index) {
            bucket.push(outcome);
        }
    }

    files
        .iter()
        .zip(per_file)
        .map(|(file, mut pages)| {
            pages.sort_by_key(|o| o.page_index);
            combine(&file.filename, pages, separator)
        })
        .collect()
}

fn combine(filename: &str, pages: Vec<UnitOutcome>, separator: &PageSeparator) -> FileResult {
    if pages.is_empty() {
        return FileResult::failure(filename, "no pages were produced");
    }
    if let Some(err) = pages.iter().find_map(|p| p.outcome.as_ref().err()) {
        return FileResult::failure(filename, err.to_string());
    }

    let mut content = String::new();
    let mut tokens = 0u64;
    for (i, page) in pages.into_iter().enumerate() {
        if let Ok(extraction) = page.outcome {
            if i > 0 {
                content.push_str(&separator.render(page.page_index + 1));
            }
            // Only the page's own boundary newlines; indentation is Markdown.
            content.push_str(extraction.content.trim_matches('\n'));
            tokens += extraction.tokens_used;
        }
    }
    content.push('\n');
    FileResult::success(filename, content, tokens)
}

//! Capability tag → keyword / tool-name table.
//!
//! The table is a fixed `match` over [`CapabilityTag`], so every tag has an
//! entry by construction. Tool entries are either exact names or name
//! prefixes (ending in `_`), matched against the live catalog by the filter.

use crate::names::*;
use continuum_core::tool::CapabilityTag;
use std::collections::BTreeSet;

/// Query keywords that select a tag.
///
/// Single words match a query word they prefix ("file" matches "files" but
/// not "profile"); entries containing a space match as a phrase.
pub fn keywords(tag: CapabilityTag) -> &'static [&'static str] {
    match tag {
        CapabilityTag::Communication => &["ask", "tell me", "notify", "message", "reply"],
        CapabilityTag::FileOps => &[
            "file", "folder", "directory", "path", "read", "write", "edit", "rename", "delete",
            "grep", "code",
        ],
        CapabilityTag::TaskOps => &["task", "todo", "plan", "checklist", "steps"],
        CapabilityTag::WebSearch => &[
            "search", "web", "internet", "google", "online", "lookup", "look up", "news", "url",
            "scrape", "crawl", "http", "api",
        ],
        CapabilityTag::DataOps => &[
            "data", "dataset", "csv", "json", "sql", "query", "analy", "statistic", "chart",
        ],
        CapabilityTag::BrowserOps => &[
            "browser", "browse", "click", "navigate", "website", "webpage", "screenshot", "login",
            "form",
        ],
        CapabilityTag::ProcessOps => &[
            "run", "execute", "command", "shell", "terminal", "script", "install", "build",
            "compile", "test", "process", "server", "deploy",
        ],
        CapabilityTag::MemoryOps => &["remember", "recall", "memory", "memorize", "forget"],
        CapabilityTag::Documents => &["document", "docx", "pdf", "report", "essay", "letter"],
        CapabilityTag::Spreadsheets => &["spreadsheet", "excel", "xlsx", "sheet", "table"],
        CapabilityTag::Presentations => &["presentation", "slide", "deck", "pptx", "powerpoint"],
        CapabilityTag::Media => &["image", "picture", "photo", "draw", "illustration", "logo"],
    }
}

/// Tool names (or `_`-terminated prefixes) a tag pulls in.
pub fn tools(tag: CapabilityTag) -> &'static [&'static str] {
    match tag {
        CapabilityTag::Communication => &[ASK, COMPLETE],
        CapabilityTag::FileOps => &[
            READ_FILE,
            CREATE_FILE,
            EDIT_FILE,
            DELETE_FILE,
            LIST_DIR,
            FIND_FILES,
            GREP,
        ],
        CapabilityTag::TaskOps => &[CREATE_TASKS, UPDATE_TASKS],
        CapabilityTag::WebSearch => &[WEB_SEARCH, SCRAPE_WEBPAGE, HTTP_REQUEST],
        CapabilityTag::DataOps => &[QUERY_DATA, DATA_PROVIDER_CALL],
        CapabilityTag::BrowserOps => &[BROWSER_PREFIX],
        CapabilityTag::ProcessOps => &[SHELL, TERMINATE_COMMAND],
        CapabilityTag::MemoryOps => &[MEMORY_SAVE, MEMORY_SEARCH],
        CapabilityTag::Documents => &[CREATE_DOCUMENT, READ_DOCUMENT],
        CapabilityTag::Spreadsheets => &[CREATE_SPREADSHEET, UPDATE_SPREADSHEET],
        CapabilityTag::Presentations => &[CREATE_PRESENTATION],
        CapabilityTag::Media => &[GENERATE_IMAGE],
    }
}

/// Whether a catalog tool name is selected by a table entry.
pub fn entry_matches(entry: &str, tool_name: &str) -> bool {
    tool_name == entry || (entry.ends_with('_') && tool_name.starts_with(entry))
}

/// Lower-case the query and split it into alphanumeric words.
fn normalize(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tags whose keywords occur in the query.
pub fn matched_tags(query: &str) -> BTreeSet<CapabilityTag> {
    let words = normalize(query);
    if words.is_empty() {
        return BTreeSet::new();
    }
    let phrase = words.join(" ");

    CapabilityTag::ALL
        .into_iter()
        .filter(|&tag| {
            keywords(tag).iter().any(|kw| {
                if kw.contains(' ') {
                    phrase.contains(kw)
                } else {
                    words.iter().any(|w| w.starts_with(kw))
                }
            })
        })
        .collect()
}

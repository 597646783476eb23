//! Canonical tool name constants.
//!
//! The capability table, the essential set and the built-in schemas all
//! reference these constants, so a rename touches only this file.

// Communication
pub const ASK: &str = "ask";
pub const COMPLETE: &str = "complete";

// Files
pub const READ_FILE: &str = "read_file";
pub const CREATE_FILE: &str = "create_file";
pub const EDIT_FILE: &str = "edit_file";
pub const DELETE_FILE: &str = "delete_file";
pub const LIST_DIR: &str = "list_dir";
pub const FIND_FILES: &str = "find_files";
pub const GREP: &str = "grep";

// Tasks
pub const CREATE_TASKS: &str = "create_tasks";
pub const UPDATE_TASKS: &str = "update_tasks";

// Web
pub const WEB_SEARCH: &str = "web_search";
pub const SCRAPE_WEBPAGE: &str = "scrape_webpage";
pub const HTTP_REQUEST: &str = "http_request";

// Processes
pub const SHELL: &str = "shell";
pub const TERMINATE_COMMAND: &str = "terminate_command";

// Browser (matched by prefix)
pub const BROWSER_PREFIX: &str = "browser_";
pub const BROWSER_NAVIGATE: &str = "browser_navigate";
pub const BROWSER_CLICK: &str = "browser_click";
pub const BROWSER_TYPE: &str = "browser_type";
pub const BROWSER_SCREENSHOT: &str = "browser_screenshot";

// Data
pub const QUERY_DATA: &str = "query_data";
pub const DATA_PROVIDER_CALL: &str = "data_provider_call";

// Memory
pub const MEMORY_SAVE: &str = "memory_save";
pub const MEMORY_SEARCH: &str = "memory_search";

// Office formats
pub const CREATE_DOCUMENT: &str = "create_document";
pub const READ_DOCUMENT: &str = "read_document";
pub const CREATE_SPREADSHEET: &str = "create_spreadsheet";
pub const UPDATE_SPREADSHEET: &str = "update_spreadsheet";
pub const CREATE_PRESENTATION: &str = "create_presentation";

// Media
pub const GENERATE_IMAGE: &str = "generate_image";

/// Tools exposed on every request regardless of the query.
pub const ESSENTIAL: [&str; 8] = [
    ASK,
    COMPLETE,
    READ_FILE,
    CREATE_FILE,
    EDIT_FILE,
    CREATE_TASKS,
    UPDATE_TASKS,
    WEB_SEARCH,
];

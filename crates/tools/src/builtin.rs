//! Schemas of the built-in tool set.
//!
//! The engine only ever sees these as [`ToolDescriptor`]s; execution lives
//! behind the embedding application's `ToolDispatcher`.

use crate::names::*;
use continuum_core::tool::{CapabilityTag, StaticCatalog, ToolDescriptor};
use serde_json::{Map, Value, json};

/// Build an object schema from `(name, type, description)` triples.
fn object(props: &[(&str, &str, &str)], required: &[&str]) -> Value {
    let properties: Map<String, Value> = props
        .iter()
        .map(|(name, ty, desc)| {
            (
                (*name).to_string(),
                json!({ "type": ty, "description": desc }),
            )
        })
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn tool(name: &str, description: &str, parameters: Value, tags: &[CapabilityTag]) -> ToolDescriptor {
    ToolDescriptor::new(name, description, parameters).with_tags(tags)
}

/// Every built-in tool, in the order they are registered.
pub fn builtin_descriptors() -> Vec<ToolDescriptor> {
    use CapabilityTag::*;

    vec![
        tool(
            ASK,
            "Ask the user a question and wait for the answer. Use when a decision or missing detail blocks progress.",
            object(&[("text", "string", "The question to ask")], &["text"]),
            &[Communication],
        ),
        tool(
            COMPLETE,
            "Signal that the task is finished. Include a short summary of what was done.",
            object(&[("summary", "string", "What was accomplished")], &[]),
            &[Communication],
        ),
        tool(
            READ_FILE,
            "Read the contents of a file at the given path.",
            object(&[("path", "string", "The file path to read")], &["path"]),
            &[FileOps],
        ),
        tool(
            CREATE_FILE,
            "Create a new file with the given content. Fails if the file already exists.",
            object(
                &[
                    ("path", "string", "Where to create the file"),
                    ("content", "string", "The full file content"),
                ],
                &["path", "content"],
            ),
            &[FileOps],
        ),
        tool(
            EDIT_FILE,
            "Replace an exact snippet in an existing file. The snippet must occur exactly once.",
            object(
                &[
                    ("path", "string", "The file to edit"),
                    ("old_text", "string", "Text to replace"),
                    ("new_text", "string", "Replacement text"),
                ],
                &["path", "old_text", "new_text"],
            ),
            &[FileOps],
        ),
        tool(
            DELETE_FILE,
            "Delete a file from the workspace.",
            object(&[("path", "string", "The file to delete")], &["path"]),
            &[FileOps],
        ),
        tool(
            LIST_DIR,
            "List the entries of a directory, one per line, with a trailing slash on subdirectories.",
            object(&[("path", "string", "Directory to list (default: workspace root)")], &[]),
            &[FileOps],
        ),
        tool(
            FIND_FILES,
            "Find files whose path matches a glob pattern.",
            object(&[("pattern", "string", "Glob pattern, e.g. src/**/*.rs")], &["pattern"]),
            &[FileOps],
        ),
        tool(
            GREP,
            "Search file contents with a regular expression and return matching lines.",
            object(
                &[
                    ("pattern", "string", "Regular expression"),
                    ("path", "string", "File or directory to search"),
                ],
                &["pattern"],
            ),
            &[FileOps],
        ),
        tool(
            CREATE_TASKS,
            "Create a task list for the current request. Each task is a short imperative sentence.",
            json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "description": "Tasks in execution order",
                        "items": { "type": "string" }
                    }
                },
                "required": ["tasks"]
            }),
            &[TaskOps],
        ),
        tool(
            UPDATE_TASKS,
            "Update the status of tasks in the current task list.",
            json!({
                "type": "object",
                "properties": {
                    "updates": {
                        "type": "array",
                        "description": "Status changes to apply",
                        "items": {
                            "type": "object",
                            "properties": {
                                "index": { "type": "integer", "description": "Zero-based task index" },
                                "status": {
                                    "type": "string",
                                    "description": "New status",
                                    "enum": ["pending", "in_progress", "done", "skipped"]
                                }
                            },
                            "required": ["index", "status"]
                        }
                    }
                },
                "required": ["updates"]
            }),
            &[TaskOps],
        ),
        tool(
            WEB_SEARCH,
            "Search the web for information. Returns a list of relevant results with titles, URLs, and snippets.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The search query" },
                    "num_results": {
                        "type": "integer",
                        "description": "Number of results to return (default 3)",
                        "default": 3
                    }
                },
                "required": ["query"]
            }),
            &[WebSearch],
        ),
        tool(
            SCRAPE_WEBPAGE,
            "Fetch a web page and return its readable text content.",
            object(&[("url", "string", "The page URL")], &["url"]),
            &[WebSearch],
        ),
        tool(
            HTTP_REQUEST,
            "Make an HTTP request to a URL. Returns the response status code, headers, and body.",
            json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The URL to send the request to" },
                    "method": {
                        "type": "string",
                        "description": "HTTP method. Defaults to GET.",
                        "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"],
                        "default": "GET"
                    },
                    "headers": {
                        "type": "object",
                        "description": "Optional HTTP headers as key-value pairs",
                        "additionalProperties": { "type": "string" }
                    },
                    "body": { "type": "string", "description": "Optional request body" }
                },
                "required": ["url"]
            }),
            &[WebSearch],
        ),
        tool(
            SHELL,
            "Execute a shell command and return stdout/stderr. Use this for running programs, builds, tests, git operations, etc.",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The shell command to execute" },
                    "session": { "type": "string", "description": "Named session to run in" },
                    "blocking": {
                        "type": "boolean",
                        "description": "Wait for the command to finish (default true)",
                        "default": true
                    }
                },
                "required": ["command"]
            }),
            &[ProcessOps],
        ),
        tool(
            TERMINATE_COMMAND,
            "Stop a running command session.",
            object(&[("session", "string", "The session to stop")], &["session"]),
            &[ProcessOps],
        ),
        tool(
            BROWSER_NAVIGATE,
            "Open a URL in the automated browser.",
            object(&[("url", "string", "The URL to open")], &["url"]),
            &[BrowserOps],
        ),
        tool(
            BROWSER_CLICK,
            "Click an element on the current page.",
            object(&[("selector", "string", "CSS selector of the element")], &["selector"]),
            &[BrowserOps],
        ),
        tool(
            BROWSER_TYPE,
            "Type text into an input on the current page.",
            object(
                &[
                    ("selector", "string", "CSS selector of the input"),
                    ("text", "string", "Text to type"),
                ],
                &["selector", "text"],
            ),
            &[BrowserOps],
        ),
        tool(
            BROWSER_SCREENSHOT,
            "Capture a screenshot of the current page.",
            object(&[("full_page", "boolean", "Capture the whole page, not just the viewport")], &[]),
            &[BrowserOps],
        ),
        tool(
            QUERY_DATA,
            "Run a SQL query against a CSV, JSON or Parquet file and return the rows.",
            object(
                &[
                    ("path", "string", "Data file to query"),
                    ("sql", "string", "Query, with the file exposed as table `data`"),
                ],
                &["path", "sql"],
            ),
            &[DataOps],
        ),
        tool(
            DATA_PROVIDER_CALL,
            "Call a registered data provider endpoint (finance, weather, etc.).",
            json!({
                "type": "object",
                "properties": {
                    "provider": { "type": "string", "description": "Provider name" },
                    "endpoint": { "type": "string", "description": "Endpoint name" },
                    "payload": { "type": "object", "description": "Endpoint parameters" }
                },
                "required": ["provider", "endpoint"]
            }),
            &[DataOps],
        ),
        tool(
            MEMORY_SAVE,
            "Save a fact to long-term memory so it can be recalled in later conversations.",
            object(
                &[
                    ("content", "string", "The fact to remember"),
                    ("tags", "string", "Comma-separated tags"),
                ],
                &["content"],
            ),
            &[MemoryOps],
        ),
        tool(
            MEMORY_SEARCH,
            "Search long-term memory for relevant facts.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What to search for" },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (default 5)",
                        "default": 5
                    }
                },
                "required": ["query"]
            }),
            &[MemoryOps],
        ),
        tool(
            CREATE_DOCUMENT,
            "Create a formatted document (DOCX or PDF) from Markdown content.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Output path" },
                    "content": { "type": "string", "description": "Markdown source" },
                    "format": { "type": "string", "enum": ["docx", "pdf"], "description": "Output format" }
                },
                "required": ["path", "content"]
            }),
            &[Documents],
        ),
        tool(
            READ_DOCUMENT,
            "Extract the text of a DOCX or PDF document.",
            object(&[("path", "string", "The document to read")], &["path"]),
            &[Documents],
        ),
        tool(
            CREATE_SPREADSHEET,
            "Create a spreadsheet from rows of cell values.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Output .xlsx path" },
                    "rows": {
                        "type": "array",
                        "description": "Rows of cell values, header first",
                        "items": { "type": "array", "items": { "type": "string" } }
                    }
                },
                "required": ["path", "rows"]
            }),
            &[Spreadsheets],
        ),
        tool(
            UPDATE_SPREADSHEET,
            "Write values into a range of an existing spreadsheet.",
            object(
                &[
                    ("path", "string", "The spreadsheet to update"),
                    ("range", "string", "A1-style range, e.g. Sheet1!B2:D4"),
                    ("values", "array", "Rows of cell values"),
                ],
                &["path", "range", "values"],
            ),
            &[Spreadsheets],
        ),
        tool(
            CREATE_PRESENTATION,
            "Create a slide deck. Each slide has a title and bullet points.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Output .pptx path" },
                    "slides": {
                        "type": "array",
                        "description": "Slides in order",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": { "type": "string" },
                                "bullets": { "type": "array", "items": { "type": "string" } }
                            },
                            "required": ["title"]
                        }
                    }
                },
                "required": ["path", "slides"]
            }),
            &[Presentations],
        ),
        tool(
            GENERATE_IMAGE,
            "Generate an image from a text prompt and save it to the workspace.",
            object(
                &[
                    ("prompt", "string", "What the image should show"),
                    ("path", "string", "Where to save the image"),
                ],
                &["prompt"],
            ),
            &[Media],
        ),
    ]
}

/// A catalog holding every built-in tool.
pub fn builtin_catalog() -> StaticCatalog {
    let mut catalog = StaticCatalog::new();
    for descriptor in builtin_descriptors() {
        // Built-in names are unique constants; a duplicate would be a bug here.
        if let Err(e) = catalog.register(descriptor) {
            tracing::error!(error = %e, "Skipping duplicate built-in tool");
        }
    }
    catalog
}

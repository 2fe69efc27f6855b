//! Local file tools: open files, list directories

use serde::Deserialize;
use tracing::debug;

use crate::tools::Tool;
use crate::{MurmurError, Result};

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

/// Opens a file with its platform default program.
pub struct OpenFileTool;

impl Tool for OpenFileTool {
    fn name(&self) -> &str {
        "open_file"
    }

    fn description(&self) -> &str {
        "Open a file on the user's machine with its default program"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path of the file to open" },
            },
            "required": ["path"],
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<String> {
        let args: PathArgs = serde_json::from_value(args)
            .map_err(|e| MurmurError::ProtocolError(format!("invalid arguments: {}", e)))?;

        if !std::path::Path::new(&args.path).exists() {
            return Ok(format!("Error opening file: {} does not exist", args.path));
        }

        debug!("Opening file: {}", args.path);
        open_with_default_program(&args.path)?;
        Ok(format!("{} opened successfully", args.path))
    }
}

fn open_with_default_program(path: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    let (program, args) = ("open", vec![path]);
    #[cfg(target_os = "windows")]
    let (program, args) = ("cmd", vec!["/C", "start", "", path]);
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let (program, args) = ("xdg-open", vec![path]);

    std::process::Command::new(program)
        .args(args)
        .spawn()
        .map_err(|e| MurmurError::ToolError(format!("could not open file: {}", e)))?;
    Ok(())
}

/// Lists files and subdirectories of a directory.
pub struct ListDirectoryTool;

impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the files and subdirectories in a directory"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path to list" },
            },
            "required": ["path"],
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<String> {
        let args: PathArgs = serde_json::from_value(args)
            .map_err(|e| MurmurError::ProtocolError(format!("invalid arguments: {}", e)))?;

        let mut files = Vec::new();
        let mut dirs = Vec::new();

        let entries = std::fs::read_dir(&args.path)
            .map_err(|e| MurmurError::ToolError(format!("cannot access {}: {}", args.path, e)))?;

        for entry in entries.flatten() {
            let path = entry.path().display().to_string();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => dirs.push(path),
                Ok(_) => files.push(path),
                Err(_) => {}
            }
        }

        files.sort();
        dirs.sort();

        Ok(serde_json::json!({ "files": files, "dirs": dirs }).to_string())
    }
}

use crate::errors::ProbeError;
use crate::logging::log_event;
use crate::runtime::FileSystem;
use serde_json::json;
use std::path::{Path, PathBuf};

pub const CARGO_TOML: &str = r#"[package]
name = "test-lsp"
version = "0.1.0"
edition = "2021"
"#;

/// Five `Down` presses from the top land on the `numbers.iter()` line, where
/// the completion scenario opens a new line with `numbers` in scope.
pub const MAIN_RS: &str = r#"fn main() {
    let message = "Hello, World!";
    println!("{}", message);

    let numbers = vec![1, 2, 3, 4, 5];
    let sum: i32 = numbers.iter().sum();
    println!("Sum: {}", sum);
}

fn helper_function(x: i32) -> i32 {
    x * 2
}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchProject {
    pub root: PathBuf,
    pub document: PathBuf,
    pub subsystem_log: PathBuf,
    pub reused: bool,
}

/// Write the project under `root`. An existing `src/main.rs` is left alone
/// so a user-supplied project can be probed as is.
pub fn prepare_project(
    fs: &dyn FileSystem,
    root: &Path,
    log_file_name: &str,
) -> Result<ScratchProject, ProbeError> {
    let src = root.join("src");
    let document = src.join("main.rs");
    let subsystem_log = root.join(log_file_name);
    let reused = fs.exists(&document);
    if !reused {
        fs.create_dir_all(&src)?;
        fs.write_string(&root.join("Cargo.toml"), CARGO_TOML)?;
        fs.write_string(&document, MAIN_RS)?;
    }
    log_event(
        "info",
        "project_prepared",
        json!({ "root": root.display().to_string(), "reused": reused }),
    );
    Ok(ScratchProject {
        root: root.to_path_buf(),
        document,
        subsystem_log,
        reused,
    })
}

#[cfg(test)]
mod tests {
    use super::{prepare_project, CARGO_TOML, MAIN_RS};
    use crate::runtime::FakeFileSystem;
    use std::path::Path;

    #[test]
    fn scaffolds_manifest_and_document() {
        let fs = FakeFileSystem::default();
        let project = prepare_project(&fs, Path::new("/tmp/p"), "rust-analyzer.log").expect("ok");
        assert!(!project.reused);
        assert_eq!(project.document, Path::new("/tmp/p/src/main.rs"));
        assert_eq!(project.subsystem_log, Path::new("/tmp/p/rust-analyzer.log"));
        assert_eq!(fs.file(Path::new("/tmp/p/Cargo.toml")).as_deref(), Some(CARGO_TOML));
        assert_eq!(fs.file(&project.document).as_deref(), Some(MAIN_RS));
    }

    #[test]
    fn existing_document_is_reused() {
        let fs = FakeFileSystem::with_file("/work/src/main.rs", "fn main() {}\n");
        let project = prepare_project(&fs, Path::new("/work"), "ra.log").expect("ok");
        assert!(project.reused);
        assert_eq!(fs.file(&project.document).as_deref(), Some("fn main() {}\n"));
        assert_eq!(fs.file(Path::new("/work/Cargo.toml")), None);
    }

    #[test]
    fn numbers_line_sits_below_five_cursor_moves() {
        let line = MAIN_RS.lines().nth(5).expect("line 6");
        assert!(line.contains("numbers.iter()"));
    }
}

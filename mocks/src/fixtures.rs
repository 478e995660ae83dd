use std::fs;
use std::path::Path;

use tempfile::TempDir;

/// A throwaway project tree on disk for scanner and store tests
pub struct ProjectFixture {
    dir: TempDir,
}

impl ProjectFixture {
    /// An empty directory
    pub fn empty() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    /// A documented project: README with frontmatter, one orphan, a
    /// feature spec, and ignored directories with decoy markdown.
    pub fn documented() -> Self {
        let fixture = Self::empty();
        fixture.write(
            "README.md",
            "---\ntitle: Fixture\nstatus: stable\n---\n# Fixture project\n",
        );
        fixture.write("RESUMEN-FOO.md", "orphan notes, no frontmatter\n");
        fixture.write(
            "specs/features/login.md",
            "---\nid: login\n---\n# Login feature\n",
        );
        fixture.write("docs/guide.md", "# Guide\nSee [readme](../README.md).\n");
        fixture.write("node_modules/pkg/README.md", "ignored\n");
        fixture
    }

    /// A minimal Rust CLI project with a readme mentioning its stack
    pub fn rust_cli() -> Self {
        let fixture = Self::empty();
        fixture.write("Cargo.toml", "[package]\nname = \"fixture\"\n");
        fixture.write("src/main.rs", "fn main() {}\n");
        fixture.write(
            "README.md",
            "# Fixture\nBuilt with Rust and Tokio.\n\n```sh\ncargo build\ncargo test\n```\n",
        );
        fixture
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file under the fixture root, creating parent directories
    pub fn write(&self, relative: &str, content: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("fixture mkdir");
        }
        fs::write(path, content).expect("fixture write");
    }

    /// Truncate the last byte of a file (state corruption scenarios)
    pub fn corrupt_truncate(&self, relative: &str) {
        let path = self.dir.path().join(relative);
        let mut content = fs::read(&path).expect("fixture read");
        content.pop();
        fs::write(&path, content).expect("fixture write");
    }
}

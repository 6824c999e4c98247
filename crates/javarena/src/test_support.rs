//! Stand-in toolchain for unit tests.
//!
//! Both "compiler" and "runtime" are `/bin/sh` running a script, so no JDK is
//! needed. The runtime executes the submitted source as a shell script, which
//! lets tests write programs like `# public class Hello\necho hi`.
//!
//! The compiler script understands two markers in the source:
//! `SYNTAX_ERROR` fails with a javac-style diagnostic and `COMPILE_SLOWLY`
//! sleeps before compiling.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::Config;

const COMPILER_SCRIPT: &str = r#"src="$1"
if grep -q COMPILE_SLOWLY "$src"; then sleep 30; fi
if grep -q SYNTAX_ERROR "$src"; then
  echo "$src:1: error: ';' expected" >&2
  exit 1
fi
touch "${src%.java}.class"
"#;

// $1 is -cp, $2 the workspace, $3 the entry name
const RUNTIME_SCRIPT: &str = r#"exec sh "$2/$3.java"
"#;

pub(crate) struct FakeJdk {
    dir: TempDir,
}

impl FakeJdk {
    pub(crate) fn install() -> Self {
        let dir = tempfile::tempdir().expect("create fake jdk dir");
        std::fs::write(dir.path().join("javac.sh"), COMPILER_SCRIPT).expect("write javac.sh");
        std::fs::write(dir.path().join("java.sh"), RUNTIME_SCRIPT).expect("write java.sh");
        std::fs::create_dir(dir.path().join("workspaces")).expect("create workspace root");
        Self { dir }
    }

    pub(crate) fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }

    fn script(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    /// Configuration pointing every toolchain lookup at the scripts
    pub(crate) fn config(&self) -> Config {
        let mut config = Config::default();
        config.toolchain.compiler_path = Some(PathBuf::from("/bin/sh"));
        config.toolchain.runtime_path = Some(PathBuf::from("/bin/sh"));
        config.compile.args = vec![self.script("javac.sh")];
        config.run.args = vec![self.script("java.sh")];
        config.workspace.root = Some(self.workspace_root());
        config.session.grace_period_secs = 2;
        config.advisor.timeout_secs = 2;
        config
    }

    /// Number of workspaces still present on disk
    pub(crate) fn leftover_workspaces(&self) -> usize {
        count_entries(&self.workspace_root())
    }
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

//! Shared fixtures: a scratch cache root and a stand-in compiler so
//! the compile/execute pipeline runs without a real `iree-compile`.

use std::path::PathBuf;
use std::sync::OnceLock;

/// The stand-in compiler: copies the positional input to the `-o`
/// target and emits a statistics file when asked, exiting zero.
const STUB_COMPILER: &str = r#"#!/bin/sh
input="$1"
shift
out=""
stats=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o)
      out="$2"
      shift 2
      ;;
    --iree-scheduling-dump-statistics-file=*)
      stats="${1#*=}"
      shift
      ;;
    *)
      shift
      ;;
  esac
done
cp "$input" "$out" || exit 1
if [ -n "$stats" ]; then
  printf '{"dispatch-count": 1}\n' > "$stats"
fi
"#;

/// Points the cache root and compiler binary at a per-process scratch
/// directory. Idempotent; every test calls it first.
pub fn setup() {
    static SCRATCH: OnceLock<(tempfile::TempDir, PathBuf)> = OnceLock::new();
    let scratch = SCRATCH.get_or_init(|| {
        let tempdir = tempfile::tempdir().expect("creating scratch dir");
        let dir = tempdir.path().to_path_buf();
        let compiler = dir.join("stub-iree-compile");
        std::fs::write(&compiler, STUB_COMPILER).expect("writing stub compiler");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755))
                .expect("marking stub compiler executable");
        }
        weft::cache::set_cache_root_override(dir.join("cache"));
        weft::compile::set_compiler_override(&compiler);
        (tempdir, dir)
    });
    let _ = scratch;
}

//! Tests for the plugin runtime.
//!
//! Supervisor and adapter tests drive real child processes: small `sh`
//! scripts standing in for plugin executables.

mod loader_tests;

#[cfg(unix)]
pub(crate) mod fake_plugin {
    use crate::plugins::manifest::PluginManifest;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    /// Writes a plugin directory (manifest + executable script) and loads
    /// its manifest.
    pub fn write_plugin(root: &Path, name: &str, script: &str) -> Arc<PluginManifest> {
        use std::os::unix::fs::PermissionsExt;

        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();

        let script_path = dir.join("run.sh");
        fs::write(&script_path, script).unwrap();
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755)).unwrap();

        let manifest_path = dir.join("plugin.yaml");
        fs::write(
            &manifest_path,
            format!(
                "version: 1\nname: {}\ntype: workflow\nprotocol: 1\nexecutable:\n  path: ./run.sh\nworkflow: {{}}\n",
                name
            ),
        )
        .unwrap();

        Arc::new(PluginManifest::load(&manifest_path).unwrap())
    }

    /// Echoes every request back as a response carrying the method name.
    /// Relies on requests serialising `id` first and `method` second.
    pub const ECHO_SERVER: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=${line#*:}; id=${id%%,*}
  method=$(printf '%s' "$line" | cut -d'"' -f6)
  printf '{"id":%s,"result":{"method":"%s"}}\n' "$id" "$method"
done
"#;

    /// Reads requests forever without ever responding.
    pub const SILENT_SERVER: &str = r#"#!/bin/sh
while IFS= read -r line; do :; done
"#;
}

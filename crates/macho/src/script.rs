//! Script emission.
//!
//! Serializes the log's planning-time command sequence into a
//! standalone shell script (and optionally a JSON sidecar) replayable
//! with nothing but the platform's own developer tools. No run ids or
//! timestamps: the same bundle and rule set must emit identical bytes
//! whether the run was dry or applied.

use gatepass_bundle::{Command, ExecutionLog};
use gatepass_common::Result;
use std::fs;
use std::path::Path;

/// Render the replay script.
pub fn render_sh(log: &ExecutionLog) -> String {
    let mut lines = vec![
        "#!/bin/sh".to_string(),
        "# generated by gatepass".to_string(),
        String::new(),
    ];
    for command in log.commands() {
        lines.extend(command.to_sh_lines());
    }
    lines.join("\n") + "\n"
}

/// Render the command sequence as a JSON array.
pub fn render_json(log: &ExecutionLog) -> Result<String> {
    let commands: Vec<&Command> = log.commands().collect();
    Ok(serde_json::to_string_pretty(&commands)?)
}

pub fn write_sh(log: &ExecutionLog, path: &Path) -> Result<()> {
    fs::write(path, render_sh(log))?;
    Ok(())
}

pub fn write_json(log: &ExecutionLog, path: &Path) -> Result<()> {
    fs::write(path, render_json(log)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatepass_bundle::ActionOutcome;

    fn sample_log() -> ExecutionLog {
        let mut log = ExecutionLog::new();
        log.record(
            "a",
            "rpath: nothing to do",
            None,
            ActionOutcome::Skipped {
                reason: "already satisfied".to_string(),
            },
        );
        log.record(
            "a",
            "delete rpath",
            Some(
                Command::new(
                    "install_name_tool",
                    vec![
                        "-delete_rpath".to_string(),
                        "/Users/build/libs".to_string(),
                        "/apps/MyApp.app/Contents/MacOS/MyApp".to_string(),
                    ],
                )
                .with_comment("delete stray rpath"),
            ),
            ActionOutcome::Applied,
        );
        log
    }

    #[test]
    fn test_render_sh_shape() {
        let rendered = render_sh(&sample_log());
        assert_eq!(
            rendered,
            "#!/bin/sh\n\
             # generated by gatepass\n\
             \n\
             # delete stray rpath\n\
             install_name_tool -delete_rpath /Users/build/libs /apps/MyApp.app/Contents/MacOS/MyApp\n"
        );
    }

    #[test]
    fn test_render_sh_is_stable_across_runs() {
        // Run ids and timestamps differ between logs; the script must
        // not.
        assert_eq!(render_sh(&sample_log()), render_sh(&sample_log()));
    }

    #[test]
    fn test_render_json_lists_only_commands() {
        let json = render_json(&sample_log()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array[0]["program"], "install_name_tool");
    }

    #[test]
    fn test_write_sh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.sh");
        write_sh(&sample_log(), &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("#!/bin/sh\n"));
        assert!(content.ends_with('\n'));
    }
}

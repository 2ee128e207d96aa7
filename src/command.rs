use tracing::debug;

use crate::chain::{ActionChain, ActionKind};

/// Processing switches that apply to the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalFlags {
    /// Value for `-p`; empty means "no preferences file" and is still passed.
    pub preferences_file: String,
    /// `-s`
    pub synthesize_shortnames: bool,
    /// `-r`
    pub process_routes: bool,
    /// `-t`
    pub process_tracks: bool,
    /// `-w`
    pub process_waypoints: bool,
    /// Smart icons are gpsbabel's default; `-N` is emitted only when this is off.
    pub smart_icons: bool,
}

impl Default for GlobalFlags {
    fn default() -> Self {
        Self {
            preferences_file: String::new(),
            synthesize_shortnames: false,
            process_routes: false,
            process_tracks: false,
            process_waypoints: false,
            smart_icons: true,
        }
    }
}

/// Render the argument vector for one run, executable first.
pub fn build_command(
    executable: &str,
    flags: &GlobalFlags,
    chain: &ActionChain,
    debug_level: Option<u32>,
) -> Vec<String> {
    let mut cmd = vec![
        executable.to_string(),
        "-p".to_string(),
        flags.preferences_file.clone(),
    ];
    if let Some(level) = debug_level {
        cmd.extend(["-D".to_string(), level.to_string()]);
    }

    let switches = [
        (flags.synthesize_shortnames, "-s"),
        (flags.process_routes, "-r"),
        (flags.process_tracks, "-t"),
        (flags.process_waypoints, "-w"),
        (!flags.smart_icons, "-N"),
    ];
    cmd.extend(
        switches
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, flag)| flag.to_string()),
    );

    for action in chain {
        let arg = action.argument();
        let path = action.path().unwrap_or_default().to_string();
        match action.kind() {
            ActionKind::Charset => cmd.extend(["-c".to_string(), arg]),
            ActionKind::InputFile => cmd.extend(["-i".to_string(), arg, "-f".to_string(), path]),
            ActionKind::OutputFile => cmd.extend(["-o".to_string(), arg, "-F".to_string(), path]),
            ActionKind::Filter => cmd.extend(["-x".to_string(), arg]),
        }
    }

    debug!(args = ?cmd, "built gpsbabel command");
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::chain::{ActionOptions, action_options};

    fn caps() -> Capabilities {
        Capabilities::new()
            .with_format("gpx", &["snlen"])
            .with_format("garmin", &["get_posn"])
            .with_filter("simplify", &["count", "error"])
            .with_charset("ISO-8859-1", &["Latin-1"])
    }

    #[test]
    fn test_chain_rendering() {
        let caps = caps();
        let mut chain = ActionChain::new();
        chain.add_action(&caps, "charset", "ISO-8859-1", None, ActionOptions::new()).unwrap();
        chain.add_action(&caps, "infile", "gpx", Some("-"), ActionOptions::new()).unwrap();
        chain
            .add_action(&caps, "filter", "simplify", None, action_options(&[("count", Some("6"))]))
            .unwrap();
        chain.add_action(&caps, "outfile", "gpx", Some("-"), ActionOptions::new()).unwrap();

        let cmd = build_command("gpsbabel", &GlobalFlags::default(), &chain, None);
        assert_eq!(
            cmd,
            [
                "gpsbabel", "-p", "", "-c", "ISO-8859-1", "-i", "gpx", "-f", "-", "-x",
                "simplify,count=6", "-o", "gpx", "-F", "-",
            ]
        );
    }

    #[test]
    fn test_global_flags_and_debug() {
        let flags = GlobalFlags {
            preferences_file: "/etc/gpsbabel.ini".to_string(),
            synthesize_shortnames: true,
            process_routes: true,
            process_tracks: true,
            process_waypoints: true,
            smart_icons: false,
        };
        let cmd = build_command("gpsbabel", &flags, &ActionChain::new(), Some(10));
        assert_eq!(
            cmd,
            ["gpsbabel", "-p", "/etc/gpsbabel.ini", "-D", "10", "-s", "-r", "-t", "-w", "-N"]
        );
    }

    #[test]
    fn test_smart_icons_default_emits_nothing() {
        let flags = GlobalFlags {
            process_tracks: true,
            ..GlobalFlags::default()
        };
        let cmd = build_command("/usr/bin/gpsbabel", &flags, &ActionChain::new(), None);
        assert_eq!(cmd, ["/usr/bin/gpsbabel", "-p", "", "-t"]);
    }

    #[test]
    fn test_flag_option_without_value() {
        let caps = caps();
        let mut chain = ActionChain::new();
        chain
            .add_action(&caps, "infile", "garmin", Some("usb:"), action_options(&[("get_posn", None)]))
            .unwrap();
        let cmd = build_command("gpsbabel", &GlobalFlags::default(), &chain, None);
        assert_eq!(&cmd[3..], ["-i", "garmin,get_posn", "-f", "usb:"]);
    }
}

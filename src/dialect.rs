//! CLI dialects keyed by `device_type`, plus the prompt and output helpers the
//! SSH session uses to talk to an interactive device shell.
//!
//! A session is driven line by line: send a line, then read until the device
//! prints its prompt again. The prompt seen right after login gives the
//! *base prompt* (the hostname part, e.g. `core-sw1` for `core-sw1#`), which
//! also matches config-mode prompts like `core-sw1(config-if)#`.

/// Commands and prompt rules for one family of device CLIs.
#[derive(Debug, PartialEq, Eq)]
pub struct Dialect {
    pub device_types: &'static [&'static str],
    /// Sent once after login so long outputs are not paginated.
    pub disable_paging: Option<&'static str>,
    pub enter_config: &'static str,
    pub exit_config: &'static str,
    /// Persists the running configuration (exec mode).
    pub save: &'static str,
    pub prompt_terminators: &'static [char],
    /// Present in every config-mode prompt, e.g. `r1(config-if)#`.
    pub config_prompt: &'static str,
    /// Line prefixes the device uses to reject a command.
    pub error_markers: &'static [&'static str],
}

const CISCO_IOS: Dialect = Dialect {
    device_types: &["cisco_ios", "cisco_xe"],
    disable_paging: Some("terminal length 0"),
    enter_config: "configure terminal",
    exit_config: "end",
    save: "write memory",
    prompt_terminators: &['#', '>'],
    config_prompt: "(config",
    error_markers: &[
        "% Invalid input",
        "% Incomplete command",
        "% Ambiguous command",
        "% Unknown command",
    ],
};

const CISCO_NXOS: Dialect = Dialect {
    device_types: &["cisco_nxos"],
    disable_paging: Some("terminal length 0"),
    enter_config: "configure terminal",
    exit_config: "end",
    save: "copy running-config startup-config",
    prompt_terminators: &['#', '>'],
    config_prompt: "(config",
    error_markers: &[
        "% Invalid command",
        "% Invalid input",
        "% Incomplete command",
        "% Ambiguous command",
        "ERROR:",
    ],
};

const CISCO_ASA: Dialect = Dialect {
    device_types: &["cisco_asa"],
    disable_paging: Some("terminal pager 0"),
    enter_config: "configure terminal",
    exit_config: "end",
    save: "write memory",
    prompt_terminators: &['#', '>'],
    config_prompt: "(config",
    error_markers: &[
        "ERROR:",
        "% Invalid input",
        "% Incomplete command",
        "% Ambiguous command",
    ],
};

const ARISTA_EOS: Dialect = Dialect {
    device_types: &["arista_eos"],
    disable_paging: Some("terminal length 0"),
    enter_config: "configure terminal",
    exit_config: "end",
    save: "write memory",
    prompt_terminators: &['#', '>'],
    config_prompt: "(config",
    error_markers: &[
        "% Invalid input",
        "% Incomplete command",
        "% Ambiguous command",
        "% Error",
    ],
};

const DIALECTS: &[&Dialect] = &[&CISCO_IOS, &CISCO_NXOS, &CISCO_ASA, &ARISTA_EOS];

/// Find the dialect for a `device_type` tag (case-insensitive).
pub fn lookup(device_type: &str) -> Option<&'static Dialect> {
    let wanted = device_type.trim().to_ascii_lowercase();
    DIALECTS
        .iter()
        .copied()
        .find(|d| d.device_types.iter().any(|t| *t == wanted))
}

/// All supported `device_type` tags.
pub fn supported_device_types() -> Vec<&'static str> {
    DIALECTS
        .iter()
        .flat_map(|d| d.device_types.iter().copied())
        .collect()
}

impl Dialect {
    /// Whether `buffer` ends in a prompt.
    ///
    /// The prompt is the last line, with no newline after it. With an empty
    /// `base_prompt` (before the first prompt has been seen) any line ending
    /// in a terminator counts.
    pub fn ends_with_prompt(&self, buffer: &str, base_prompt: &str) -> bool {
        let last = last_line(buffer);
        !last.is_empty()
            && last.starts_with(base_prompt)
            && last
                .chars()
                .last()
                .is_some_and(|c| self.prompt_terminators.contains(&c))
    }

    /// Whether a prompt line belongs to config mode.
    pub fn in_config_mode(&self, prompt: &str) -> bool {
        prompt.contains(self.config_prompt)
    }

    /// The first line of `output` that reports a rejected command.
    pub fn rejection<'a>(&self, output: &'a str) -> Option<&'a str> {
        output
            .lines()
            .map(str::trim)
            .find(|line| self.error_markers.iter().any(|m| line.starts_with(m)))
    }

    /// Derive the base prompt from a full prompt line: `r1(config)#` -> `r1`.
    pub fn base_prompt<'a>(&self, prompt: &'a str) -> &'a str {
        let prompt = prompt.trim();
        let prompt = prompt.trim_end_matches(self.prompt_terminators);
        match prompt.find('(') {
            Some(idx) => &prompt[..idx],
            None => prompt,
        }
    }
}

/// The text after the last line break, with trailing whitespace removed.
pub fn last_line(buffer: &str) -> &str {
    buffer
        .rsplit(['\n', '\r'])
        .next()
        .unwrap_or_default()
        .trim_end()
}

/// Convert CRLF and stray CR to plain LF.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "")
}

/// Strip the echoed command line (and anything before it) and the trailing
/// prompt from exec output.
pub fn clean_exec_output(raw: &str, command: &str, base_prompt: &str) -> String {
    let text = normalize_newlines(raw);
    let mut lines: Vec<&str> = text.lines().collect();

    let command = command.trim();
    if !command.is_empty() {
        if let Some(echo) = lines
            .iter()
            .position(|line| line.trim_end().ends_with(command))
        {
            lines.drain(..=echo);
        }
    }
    if lines
        .last()
        .is_some_and(|last| !base_prompt.is_empty() && last.trim().starts_with(base_prompt))
    {
        lines.pop();
    }

    lines.join("\n").trim_end().to_string()
}

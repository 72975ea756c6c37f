//! Terminal escape sequence removal.

/// Strip ANSI/VT escape sequences and control characters (except tab).
#[must_use]
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.next() {
                // CSI: parameters, then a final byte in '@'..='~'
                Some('[') => {
                    for nc in chars.by_ref() {
                        if ('@'..='~').contains(&nc) {
                            break;
                        }
                    }
                }
                // OSC: terminated by BEL or ST (ESC \)
                Some(']') => loop {
                    match chars.next() {
                        Some('\x07') | None => break,
                        Some('\x1b') => {
                            if chars.peek() == Some(&'\\') {
                                chars.next();
                            }
                            break;
                        }
                        _ => {}
                    }
                },
                // Character set designation takes one more byte
                Some('(' | ')' | '*' | '+') => {
                    chars.next();
                }
                // DCS, SOS, PM, APC: terminated by ST
                Some('P' | 'X' | '^' | '_') => loop {
                    match chars.next() {
                        Some('\x1b') => {
                            chars.next();
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                },
                _ => {}
            },
            '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

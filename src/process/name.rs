//! Display names derived from command lines.

use std::path::Path;

/// Package managers whose first argument (after an optional `run`) is a
/// script name.
const PACKAGE_MANAGERS: &[&str] = &["npm", "pnpm", "yarn", "bun"];

/// Package runners whose first argument is a tool.
const PACKAGE_RUNNERS: &[&str] = &["npx", "pnpx", "bunx"];

/// Dev-server tools with a friendlier display name.
const KNOWN_TOOLS: &[(&str, &str)] = &[
    ("vite", "Vite"),
    ("next", "Next.js"),
    ("nuxt", "Nuxt"),
    ("nuxi", "Nuxt"),
    ("astro", "Astro"),
    ("remix", "Remix"),
    ("ng", "Angular"),
    ("webpack", "webpack"),
    ("webpack-dev-server", "webpack"),
    ("parcel", "Parcel"),
    ("gatsby", "Gatsby"),
    ("svelte-kit", "SvelteKit"),
    ("react-scripts", "Create React App"),
    ("http-server", "http-server"),
    ("serve", "serve"),
    ("live-server", "live-server"),
    ("uvicorn", "Uvicorn"),
    ("gunicorn", "Gunicorn"),
    ("flask", "Flask"),
    ("rails", "Rails"),
    ("hugo", "Hugo"),
    ("trunk", "Trunk"),
];

/// Flags of `docker run` that consume the following token.
const DOCKER_VALUE_FLAGS: &[&str] = &[
    "-p",
    "--publish",
    "-e",
    "--env",
    "-v",
    "--volume",
    "--name",
    "-w",
    "--workdir",
    "--network",
    "--env-file",
    "--entrypoint",
    "-u",
    "--user",
    "--platform",
    "--mount",
    "-l",
    "--label",
];

fn basename(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(program)
}

fn known_tool(tool: &str) -> Option<&'static str> {
    KNOWN_TOOLS
        .iter()
        .find(|(bin, _)| *bin == tool)
        .map(|(_, name)| *name)
}

fn docker_image<'a>(args: &[&'a str]) -> Option<&'a str> {
    let mut rest = args.iter();
    while let Some(arg) = rest.next() {
        if arg.starts_with('-') {
            if DOCKER_VALUE_FLAGS.contains(arg) {
                rest.next();
            }
            continue;
        }
        return Some(arg);
    }
    None
}

/// Derive a short display name for a command.
///
/// Recognizes package-manager scripts (`npm run dev` → `npm: dev`), package
/// runners and common dev-server tools (`npx vite` → `Vite`), `docker run`
/// images, Python and Django servers, and `cargo run`/`go run`. Anything
/// else is named after its executable.
#[must_use]
pub fn display_name(command: &str) -> String {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let Some((&program, args)) = tokens.split_first() else {
        return String::new();
    };
    let program = basename(program);

    if PACKAGE_MANAGERS.contains(&program) {
        let script = match args {
            ["run" | "run-script", script, ..] => Some(*script),
            [script, ..] if !script.starts_with('-') => Some(*script),
            _ => None,
        };
        return match script {
            Some(script) => format!("{program}: {script}"),
            None => program.to_string(),
        };
    }

    if PACKAGE_RUNNERS.contains(&program) {
        if let Some(tool) = args.iter().find(|arg| !arg.starts_with('-')) {
            return known_tool(tool).map_or_else(|| (*tool).to_string(), String::from);
        }
    }

    if let Some(name) = known_tool(program) {
        return name.to_string();
    }

    match (program, args) {
        ("docker" | "podman", ["run", rest @ ..]) => {
            if let Some(image) = docker_image(rest) {
                return format!("{program}: {image}");
            }
        }
        ("python" | "python3" | "py", ["-m", "http.server", ..]) => {
            return "Python HTTP server".to_string();
        }
        ("python" | "python3" | "py", [script, "runserver", ..]) if script.ends_with("manage.py") => {
            return "Django".to_string();
        }
        ("python" | "python3" | "py", ["-m", module, ..]) => {
            if let Some(name) = known_tool(module) {
                return name.to_string();
            }
        }
        ("cargo", ["run", ..]) => return "cargo run".to_string(),
        ("go", ["run", ..]) => return "go run".to_string(),
        _ => {}
    }

    program.to_string()
}

//! Route table and the title each route puts on the window.

use decolorize_colors::APP_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub path: &'static str,
    pub name: &'static str,
    pub title: &'static str,
}

pub const ROUTES: &[Route] = &[
    Route { path: "/", name: "home", title: "Home" },
    Route { path: "/colors", name: "colors", title: "Colors" },
    Route { path: "/palette", name: "palette", title: "Palette" },
    Route { path: "/hue", name: "hue", title: "Hue" },
    Route { path: "/explore", name: "explore", title: "Explore" },
];

/// Outcome of navigating to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub route: &'static Route,
    /// The requested path matched nothing and was sent home.
    pub redirected: bool,
}

impl Resolved {
    pub fn title(&self) -> String {
        format!("{APP_NAME} · {}", self.route.title)
    }
}

/// Match `path` against the table; unknown paths redirect to `/`.
///
/// Query strings, fragments and a trailing slash are ignored.
pub fn resolve(path: &str) -> Resolved {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    let normalized = if trimmed.is_empty() { "/" } else { trimmed };

    match ROUTES.iter().find(|route| route.path == normalized) {
        Some(route) => Resolved {
            route,
            redirected: false,
        },
        None => Resolved {
            route: &ROUTES[0],
            redirected: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_paths_resolve_with_titles() {
        let resolved = resolve("/palette");
        assert_eq!(resolved.route.name, "palette");
        assert!(!resolved.redirected);
        assert_eq!(resolved.title(), "De-Colorize · Palette");
    }

    #[test]
    fn trailing_slash_and_query_are_ignored() {
        assert_eq!(resolve("/hue/").route.name, "hue");
        assert_eq!(resolve("/explore?tab=new#top").route.name, "explore");
        assert_eq!(resolve("").route.name, "home");
    }

    #[test]
    fn unknown_paths_redirect_home() {
        let resolved = resolve("/nowhere/at/all");
        assert!(resolved.redirected);
        assert_eq!(resolved.route.path, "/");
        assert_eq!(resolved.title(), "De-Colorize · Home");
    }
}

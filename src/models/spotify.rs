// Spotify Web API call descriptions and payload shaping

use serde_json::Value;

/// Scope a proxied call relies on. Marker only; enforcement is the
/// provider's, but it makes required permissions explicit per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredScope {
    UserReadPrivate,
    UserTopRead,
    UserLibraryRead,
}

impl RequiredScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredScope::UserReadPrivate => "user-read-private",
            RequiredScope::UserTopRead => "user-top-read",
            RequiredScope::UserLibraryRead => "user-library-read",
        }
    }
}

/// One proxied request: target endpoint, query parameters and the scope it
/// relies on. Constructed per invocation, never persisted.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    /// Path under the API base, e.g. `/me/top/tracks`
    pub path: &'static str,

    pub query: Vec<(&'static str, String)>,

    pub required_scope: RequiredScope,
}

impl UpstreamCall {
    /// `GET /me`
    pub fn user_profile() -> Self {
        Self {
            path: "/me",
            query: Vec::new(),
            required_scope: RequiredScope::UserReadPrivate,
        }
    }

    /// `GET /me/top/tracks` — top 10 over roughly the last six months
    pub fn top_tracks() -> Self {
        Self {
            path: "/me/top/tracks",
            query: vec![("limit", "10".to_string()), ("time_range", "medium_term".to_string())],
            required_scope: RequiredScope::UserTopRead,
        }
    }

    /// `GET /me/top/artists`
    pub fn top_artists() -> Self {
        Self {
            path: "/me/top/artists",
            query: vec![("limit", "10".to_string()), ("time_range", "medium_term".to_string())],
            required_scope: RequiredScope::UserTopRead,
        }
    }

    /// `GET /recommendations` seeded by artist IDs
    pub fn recommendations(seed_artists: &str) -> Self {
        Self {
            path: "/recommendations",
            query: vec![
                ("seed_artists", seed_artists.to_string()),
                ("limit", "10".to_string()),
            ],
            required_scope: RequiredScope::UserTopRead,
        }
    }
}

/// Pluck the `items` array out of a paged provider payload.
/// Falls back to the payload itself if the provider shape changes.
pub fn items_of(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => map.remove("items").unwrap_or(Value::Object(map)),
        other => other,
    }
}

/// Pluck the `tracks` array out of a recommendations payload.
pub fn tracks_of(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => map.remove("tracks").unwrap_or(Value::Object(map)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_items_calls_use_medium_term_window() {
        let call = UpstreamCall::top_tracks();
        assert_eq!(call.path, "/me/top/tracks");
        assert!(call.query.contains(&("limit", "10".to_string())));
        assert!(call
            .query
            .contains(&("time_range", "medium_term".to_string())));
        assert_eq!(call.required_scope, RequiredScope::UserTopRead);
    }

    #[test]
    fn recommendations_carry_the_seed_artists() {
        let call = UpstreamCall::recommendations("id1,id2,id3");
        assert!(call
            .query
            .contains(&("seed_artists", "id1,id2,id3".to_string())));
    }

    #[test]
    fn items_are_extracted_from_paged_payloads() {
        let payload = json!({"items": [{"name": "Track"}], "total": 1});
        assert_eq!(items_of(payload), json!([{"name": "Track"}]));

        // Non-paged payloads pass through untouched
        let passthrough = json!([1, 2, 3]);
        assert_eq!(items_of(passthrough.clone()), passthrough);
    }

    #[test]
    fn tracks_are_extracted_from_recommendation_payloads() {
        let payload = json!({"tracks": [{"name": "Track"}], "seeds": []});
        assert_eq!(tracks_of(payload), json!([{"name": "Track"}]));
    }

    #[test]
    fn scope_markers_render_their_wire_names() {
        assert_eq!(RequiredScope::UserReadPrivate.as_str(), "user-read-private");
        assert_eq!(RequiredScope::UserLibraryRead.as_str(), "user-library-read");
    }
}

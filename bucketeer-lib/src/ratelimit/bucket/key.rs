use http::Method;
use serde::Deserialize;
use std::fmt;

/// A logical route template identifying one rate-limit domain,
/// e.g. `/channels/{id}/messages`.
///
/// Trailing slashes are trimmed so that `/gateway` and `/gateway/` share a
/// bucket.
///
/// # Examples
///
/// ```
/// use bucketeer_lib::ratelimit::Route;
///
/// let route = Route::from("/channels/1/messages/");
/// assert_eq!(route.as_str(), "/channels/1/messages");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub struct Route(String);

impl Route {
    /// Get the route as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the route as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    fn normalize(route: &str) -> String {
        let trimmed = route.trim_end_matches('/');
        if trimmed.is_empty() {
            String::from("/")
        } else {
            trimmed.to_string()
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Route {
    fn from(route: String) -> Self {
        Route(Self::normalize(&route))
    }
}

impl From<&str> for Route {
    fn from(route: &str) -> Self {
        Route(Self::normalize(route))
    }
}

/// Identity of a bucket: the HTTP method together with the route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// HTTP method (verb)
    pub method: Method,
    /// Logical route template
    pub route: Route,
}

impl BucketKey {
    /// Create a key for `method` and `route`
    pub fn new(method: Method, route: impl Into<Route>) -> Self {
        Self {
            method,
            route: route.into(),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_trailing_slash() {
        assert_eq!(Route::from("/gateway/"), Route::from("/gateway"));
        assert_eq!(Route::from("/").as_str(), "/");
        assert_eq!(Route::from("").as_str(), "/");
    }

    #[test]
    fn test_key_display() {
        let key = BucketKey::new(Method::POST, "/channels/1/messages");
        assert_eq!(format!("{key}"), "POST /channels/1/messages");
    }

    #[test]
    fn test_method_separates_buckets() {
        use std::collections::HashMap;

        let post = BucketKey::new(Method::POST, "/channels/1/messages");
        let get = BucketKey::new(Method::GET, "/channels/1/messages");
        assert_ne!(post, get);

        let mut map = HashMap::new();
        map.insert(post, "value");

        // Same key, different spelling of the route
        let again = BucketKey::new(Method::POST, "/channels/1/messages/");
        assert_eq!(map.get(&again), Some(&"value"));
    }
}

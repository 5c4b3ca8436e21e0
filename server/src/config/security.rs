use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

const NOSNIFF: &str = "nosniff";
const DENY: &str = "DENY";
const XSS_BLOCK: &str = "1; mode=block";
const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";
const CSP_API_VALUE: &str = "default-src 'none'; frame-ancestors 'none'";
const REFERRER_POLICY_VALUE: &str = "strict-origin-when-cross-origin";
const PERMISSIONS_POLICY_VALUE: &str = "camera=(), microphone=(), geolocation=()";

fn static_headers(include_hsts: bool) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = vec![
        (HeaderName::from_static("x-content-type-options"), HeaderValue::from_static(NOSNIFF)),
        (HeaderName::from_static("x-frame-options"), HeaderValue::from_static(DENY)),
        (HeaderName::from_static("x-xss-protection"), HeaderValue::from_static(XSS_BLOCK)),
        (HeaderName::from_static("content-security-policy"), HeaderValue::from_static(CSP_API_VALUE)),
        (HeaderName::from_static("referrer-policy"), HeaderValue::from_static(REFERRER_POLICY_VALUE)),
        (HeaderName::from_static("permissions-policy"), HeaderValue::from_static(PERMISSIONS_POLICY_VALUE)),
    ];
    // HSTS only makes sense behind HTTPS.
    if include_hsts {
        headers.push((
            HeaderName::from_static("strict-transport-security"),
            HeaderValue::from_static(HSTS_VALUE),
        ));
    }
    headers
}

/// Stamps the API security headers on every response.
pub fn with_security_headers<S>(router: Router<S>, include_hsts: bool) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    static_headers(include_hsts)
        .into_iter()
        .fold(router, |router, (name, value)| {
            router.layer(SetResponseHeaderLayer::overriding(name, value))
        })
}

use cookie::{Cookie, SameSite};
use time::Duration;
use tower_cookies::Cookies;

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
const SECURE: bool = true;

pub struct CookieManager;

impl CookieManager {
    pub fn set_refresh_token(cookies: &Cookies, refresh_token: &str, max_age: std::time::Duration) {
        let max_age = Duration::seconds(max_age.as_secs() as i64);
        let cookie = Cookie::build((REFRESH_TOKEN_COOKIE, refresh_token.to_string()))
            .http_only(true)
            .secure(SECURE)
            .same_site(SameSite::Strict)
            .path("/")
            .max_age(max_age)
            .build();
        cookies.add(cookie);
    }

    pub fn clear_refresh_token(cookies: &Cookies) {
        let cookie = Cookie::build((REFRESH_TOKEN_COOKIE, ""))
            .http_only(true)
            .secure(SECURE)
            .same_site(SameSite::Strict)
            .path("/")
            .max_age(Duration::ZERO)
            .build();
        cookies.add(cookie);
    }

    pub fn refresh_token(cookies: &Cookies) -> Option<String> {
        cookies
            .get(REFRESH_TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    }
}

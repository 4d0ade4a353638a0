use dom_query::Selection;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static STATUS_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/status/(\d+)").expect("valid status regex"));

/// A feed site with known post markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    X,
    Reddit,
}

impl Platform {
    /// Picks the platform for a page URL. Unsupported hosts yield `None`.
    pub fn detect(raw_url: &str) -> Option<Self> {
        let url = Url::parse(raw_url).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        let on = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));
        if on("x.com") || on("twitter.com") {
            Some(Platform::X)
        } else if on("reddit.com") {
            Some(Platform::Reddit)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::X => "x",
            Platform::Reddit => "reddit",
        }
    }

    pub fn post_selector(&self) -> &'static str {
        match self {
            Platform::X => r#"article[data-testid="tweet"]"#,
            Platform::Reddit => "shreddit-post, shreddit-comment",
        }
    }

    fn text_selectors(&self) -> &'static [&'static str] {
        match self {
            Platform::X => &[r#"[data-testid="tweetText"]"#],
            Platform::Reddit => &[r#"[slot="comment"]"#, r#"[slot="text-body"]"#, r#"[slot="title"]"#],
        }
    }

    /// Post text, trimmed; empty when the post carries no text node. Only the
    /// first match counts, so nested replies and quoted posts are left out.
    pub fn extract_text(&self, post: &Selection) -> String {
        self.text_selectors()
            .iter()
            .map(|selector| post.select(selector).first().text().trim().to_string())
            .find(|text| !text.is_empty())
            .unwrap_or_default()
    }

    /// Stable identifier for caching: the status id on X, the thing id or
    /// element id on Reddit.
    pub fn extract_post_id(&self, post: &Selection) -> Option<String> {
        match self {
            Platform::X => post
                .select(r#"a[href*="/status/"]"#)
                .iter()
                .filter_map(|link| link.attr("href"))
                .find_map(|href| {
                    STATUS_ID_REGEX
                        .captures(&href)
                        .map(|caps| caps[1].to_string())
                }),
            Platform::Reddit => ["thingid", "id"]
                .iter()
                .filter_map(|name| post.attr(name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty()),
        }
    }
}

//! OAuth redirect-callback evidence, parsed once from the page URL.

use url::Url;

const CODE_PARAM: &str = "code";
const STATE_PARAM: &str = "state";
const LIFF_STATE_PARAM: &str = "liff.state";
const CLIENT_ID_PARAM: &str = "liffClientId";
const REDIRECT_URI_PARAM: &str = "liffRedirectUri";

/// Parameters removed from the URL once the callback has been consumed.
pub const SENSITIVE_PARAMS: [&str; 5] = [
    CODE_PARAM,
    STATE_PARAM,
    LIFF_STATE_PARAM,
    CLIENT_ID_PARAM,
    REDIRECT_URI_PARAM,
];

/// Proof that the page was loaded as a LINE login callback.
///
/// Only built when `code`, `state` (or `liff.state`) and `liffClientId` are
/// all present and non-empty; any one alone shows up in unrelated links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectEvidence {
    code: String,
    state: String,
    client_id: String,
    url: Url,
}

impl RedirectEvidence {
    pub fn from_url(url: &Url) -> Option<Self> {
        let mut code = None;
        let mut state = None;
        let mut liff_state = None;
        let mut client_id = None;

        for (key, value) in url.query_pairs() {
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                CODE_PARAM => code = Some(value.into_owned()),
                STATE_PARAM => state = Some(value.into_owned()),
                LIFF_STATE_PARAM => liff_state = Some(value.into_owned()),
                CLIENT_ID_PARAM => client_id = Some(value.into_owned()),
                _ => {}
            }
        }

        Some(Self {
            code: code?,
            state: state.or(liff_state)?,
            client_id: client_id?,
            url: url.clone(),
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The callback URL with every sensitive parameter removed. Other
    /// parameters keep their order.
    pub fn stripped_url(&self) -> Url {
        strip_sensitive_params(&self.url)
    }
}

pub fn strip_sensitive_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !SENSITIVE_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

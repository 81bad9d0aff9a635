//! Default channel grouping.
//!
//! Every touchpoint gets exactly one [`ChannelGroup`]. Rules are evaluated in
//! a fixed order and the first match wins, so the order of [`RULES`] carries
//! meaning: e.g. a paid medium from a social source must become Paid Social
//! before the generic Paid Other rule gets a chance.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelGroup {
    #[serde(rename = "Direct")]
    Direct,
    #[serde(rename = "Cross Network")]
    CrossNetwork,
    #[serde(rename = "Paid Shopping")]
    PaidShopping,
    #[serde(rename = "Paid Search")]
    PaidSearch,
    #[serde(rename = "Paid Social")]
    PaidSocial,
    #[serde(rename = "Paid Video")]
    PaidVideo,
    #[serde(rename = "Display")]
    Display,
    #[serde(rename = "Paid Other")]
    PaidOther,
    #[serde(rename = "Organic Shopping")]
    OrganicShopping,
    #[serde(rename = "Organic Social")]
    OrganicSocial,
    #[serde(rename = "Organic Video")]
    OrganicVideo,
    #[serde(rename = "Organic Search")]
    OrganicSearch,
    #[serde(rename = "Referral")]
    Referral,
    #[serde(rename = "Email")]
    Email,
    #[serde(rename = "Affiliates")]
    Affiliates,
    #[serde(rename = "Audio")]
    Audio,
    #[serde(rename = "SMS")]
    Sms,
    #[serde(rename = "Mobile Push Notifications")]
    MobilePushNotifications,
    #[serde(rename = "Unassigned")]
    Unassigned,
}

impl ChannelGroup {
    pub const ALL: [ChannelGroup; 19] = [
        ChannelGroup::Direct,
        ChannelGroup::CrossNetwork,
        ChannelGroup::PaidShopping,
        ChannelGroup::PaidSearch,
        ChannelGroup::PaidSocial,
        ChannelGroup::PaidVideo,
        ChannelGroup::Display,
        ChannelGroup::PaidOther,
        ChannelGroup::OrganicShopping,
        ChannelGroup::OrganicSocial,
        ChannelGroup::OrganicVideo,
        ChannelGroup::OrganicSearch,
        ChannelGroup::Referral,
        ChannelGroup::Email,
        ChannelGroup::Affiliates,
        ChannelGroup::Audio,
        ChannelGroup::Sms,
        ChannelGroup::MobilePushNotifications,
        ChannelGroup::Unassigned,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ChannelGroup::Direct => "Direct",
            ChannelGroup::CrossNetwork => "Cross Network",
            ChannelGroup::PaidShopping => "Paid Shopping",
            ChannelGroup::PaidSearch => "Paid Search",
            ChannelGroup::PaidSocial => "Paid Social",
            ChannelGroup::PaidVideo => "Paid Video",
            ChannelGroup::Display => "Display",
            ChannelGroup::PaidOther => "Paid Other",
            ChannelGroup::OrganicShopping => "Organic Shopping",
            ChannelGroup::OrganicSocial => "Organic Social",
            ChannelGroup::OrganicVideo => "Organic Video",
            ChannelGroup::OrganicSearch => "Organic Search",
            ChannelGroup::Referral => "Referral",
            ChannelGroup::Email => "Email",
            ChannelGroup::Affiliates => "Affiliates",
            ChannelGroup::Audio => "Audio",
            ChannelGroup::Sms => "SMS",
            ChannelGroup::MobilePushNotifications => "Mobile Push Notifications",
            ChannelGroup::Unassigned => "Unassigned",
        }
    }
}

impl fmt::Display for ChannelGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ChannelGroup {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        ChannelGroup::ALL
            .into_iter()
            .find(|group| group.label() == raw)
            .ok_or_else(|| anyhow!("unknown channel group: {raw}"))
    }
}

pub const CATEGORY_SEARCH: &str = "search";
pub const CATEGORY_SHOPPING: &str = "shopping";
pub const CATEGORY_SOCIAL: &str = "social";
pub const CATEGORY_VIDEO: &str = "video";

/// Normalise a category name: `SOURCE_CATEGORY_SEARCH` and `Search` both
/// become `search`.
fn normalize_category(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    lower
        .strip_prefix("source_category_")
        .map(str::to_string)
        .unwrap_or(lower)
}

/// Known traffic sources per source category (Search, Shopping, Social,
/// Video). Read-only for the duration of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCategories {
    categories: BTreeMap<String, BTreeSet<String>>,
}

impl SourceCategories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(source, category)` pairs as stored in the
    /// `source_categories` table.
    pub fn from_pairs<I, S, C>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, C)>,
        S: AsRef<str>,
        C: AsRef<str>,
    {
        let mut categories = Self::new();
        for (source, category) in pairs {
            categories.insert(category.as_ref(), source.as_ref());
        }
        categories
    }

    pub fn insert(&mut self, category: &str, source: &str) {
        let source = source.trim().to_lowercase();
        if source.is_empty() {
            return;
        }
        self.categories
            .entry(normalize_category(category))
            .or_default()
            .insert(source);
    }

    /// Case-insensitive membership of `source` in `category`.
    pub fn contains(&self, category: &str, source: &str) -> bool {
        self.categories
            .get(&normalize_category(category))
            .map(|sources| sources.contains(&source.trim().to_lowercase()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(source, category)` pairs in a stable order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.categories
            .iter()
            .flat_map(|(category, sources)| {
                sources
                    .iter()
                    .map(move |source| (source.clone(), category.clone()))
            })
            .collect()
    }

    /// A compact starter list of well-known sources, used to seed an empty
    /// `source_categories` table.
    pub fn builtin() -> Self {
        const SEARCH: &[&str] = &[
            "google", "bing", "yahoo", "baidu", "duckduckgo", "yandex", "ecosia", "naver",
            "seznam", "ask", "aol", "qwant", "startpage", "search.brave.com", "yandex.ru",
            "m.baidu.com", "search.yahoo.com", "so.com", "sogou",
        ];
        const SHOPPING: &[&str] = &[
            "amazon", "amazon.com", "ebay", "ebay.com", "etsy", "etsy.com", "shopify",
            "shopping.google", "google shopping", "walmart", "walmart.com", "aliexpress",
            "zalando", "idealo", "igshopping", "mercadolibre",
        ];
        const SOCIAL: &[&str] = &[
            "facebook", "facebook.com", "m.facebook.com", "l.facebook.com", "lm.facebook.com",
            "fb", "instagram", "instagram.com", "ig", "linkedin", "linkedin.com", "lnkd.in",
            "twitter", "twitter.com", "t.co", "x.com", "pinterest", "pinterest.com", "reddit",
            "reddit.com", "tiktok", "tiktok.com", "snapchat", "whatsapp", "telegram",
            "threads.net",
        ];
        const VIDEO: &[&str] = &[
            "youtube", "youtube.com", "m.youtube.com", "vimeo", "vimeo.com", "twitch",
            "twitch.tv", "dailymotion", "wistia",
        ];

        let mut categories = Self::new();
        for (category, sources) in [
            (CATEGORY_SEARCH, SEARCH),
            (CATEGORY_SHOPPING, SHOPPING),
            (CATEGORY_SOCIAL, SOCIAL),
            (CATEGORY_VIDEO, VIDEO),
        ] {
            for source in sources {
                categories.insert(category, source);
            }
        }
        categories
    }
}

/// Regular expressions used by the cascade, compiled once per classifier.
#[derive(Debug, Clone)]
struct ChannelPatterns {
    paid_medium: Regex,
    shopping_campaign: Regex,
    email: Regex,
    push_medium: Regex,
}

impl ChannelPatterns {
    fn compile() -> Result<Self> {
        Ok(Self {
            paid_medium: Regex::new(r"^(.*cp.*|ppc|retargeting|paid.*)$")?,
            shopping_campaign: Regex::new(r"(([^a-df-z]|^)shop|shopping)")?,
            email: Regex::new(r"^e[-_ ]?mail$")?,
            push_medium: Regex::new(r"(push$|mobile|notification)")?,
        })
    }
}

const SOCIAL_MEDIA: [&str; 6] = [
    "social",
    "social-network",
    "social-media",
    "sm",
    "social network",
    "social media",
];
const DISPLAY_MEDIA: [&str; 5] = ["display", "banner", "expandable", "interstitial", "cpm"];
const REFERRAL_MEDIA: [&str; 3] = ["referral", "app", "link"];

/// One touchpoint as seen by the rules. Fields must already be lower-cased.
struct Touch<'a> {
    source: &'a str,
    medium: &'a str,
    campaign: &'a str,
    classifier: &'a ChannelClassifier,
}

impl Touch<'_> {
    fn in_category(&self, category: &str) -> bool {
        self.classifier.categories.contains(category, self.source)
    }

    fn paid(&self) -> bool {
        self.classifier.patterns.paid_medium.is_match(self.medium)
    }

    fn shopping(&self) -> bool {
        self.classifier
            .patterns
            .shopping_campaign
            .is_match(self.campaign)
            || self.in_category(CATEGORY_SHOPPING)
    }
}

type Rule = (ChannelGroup, fn(&Touch<'_>) -> bool);

/// The cascade, in evaluation order. Anything that matches no rule is
/// [`ChannelGroup::Unassigned`].
const RULES: [Rule; 18] = [
    (ChannelGroup::Direct, |t| {
        t.source == "(direct)" && matches!(t.medium, "(not set)" | "(none)")
    }),
    (ChannelGroup::CrossNetwork, |t| {
        t.campaign.contains("cross-network") && t.medium != "referral"
    }),
    (ChannelGroup::PaidShopping, |t| t.paid() && t.shopping()),
    (ChannelGroup::PaidSearch, |t| {
        t.paid() && t.in_category(CATEGORY_SEARCH)
    }),
    (ChannelGroup::PaidSocial, |t| {
        t.paid() && t.in_category(CATEGORY_SOCIAL)
    }),
    (ChannelGroup::PaidVideo, |t| {
        t.paid() && t.in_category(CATEGORY_VIDEO)
    }),
    (ChannelGroup::Display, |t| DISPLAY_MEDIA.contains(&t.medium)),
    // Paid media whose source belongs to no category.
    (ChannelGroup::PaidOther, |t| t.paid()),
    (ChannelGroup::OrganicShopping, |t| t.shopping()),
    (ChannelGroup::OrganicSocial, |t| {
        SOCIAL_MEDIA.contains(&t.medium) || t.in_category(CATEGORY_SOCIAL)
    }),
    (ChannelGroup::OrganicVideo, |t| {
        t.medium.contains("video") || t.in_category(CATEGORY_VIDEO)
    }),
    (ChannelGroup::OrganicSearch, |t| {
        t.medium == "organic" || t.in_category(CATEGORY_SEARCH)
    }),
    (ChannelGroup::Referral, |t| REFERRAL_MEDIA.contains(&t.medium)),
    (ChannelGroup::Email, |t| {
        let email = &t.classifier.patterns.email;
        email.is_match(t.source) || email.is_match(t.medium)
    }),
    (ChannelGroup::Affiliates, |t| t.medium == "affiliate"),
    (ChannelGroup::Audio, |t| t.medium == "audio"),
    (ChannelGroup::Sms, |t| {
        t.source.contains("sms") || t.medium.contains("sms")
    }),
    (ChannelGroup::MobilePushNotifications, |t| {
        t.source == "firebase" || t.classifier.patterns.push_medium.is_match(t.medium)
    }),
];

/// Pure classifier over lower-cased (source, medium, campaign) triples.
#[derive(Debug, Clone)]
pub struct ChannelClassifier {
    categories: SourceCategories,
    patterns: ChannelPatterns,
}

impl ChannelClassifier {
    pub fn new(categories: SourceCategories) -> Result<Self> {
        Ok(Self {
            categories,
            patterns: ChannelPatterns::compile()?,
        })
    }

    /// Labels of every rule matching the touchpoint, in cascade order.
    ///
    /// The first element is the classification; the full list is only used
    /// for diagnostics (`touchline classify`).
    pub fn matching_rules(&self, source: &str, medium: &str, campaign: &str) -> Vec<ChannelGroup> {
        let touch = Touch {
            source,
            medium,
            campaign,
            classifier: self,
        };
        RULES
            .iter()
            .filter(|(_, rule)| rule(&touch))
            .map(|(group, _)| *group)
            .collect()
    }

    pub fn classify(&self, source: &str, medium: &str, campaign: &str) -> ChannelGroup {
        let touch = Touch {
            source,
            medium,
            campaign,
            classifier: self,
        };
        RULES
            .iter()
            .find(|(_, rule)| rule(&touch))
            .map(|(group, _)| *group)
            .unwrap_or(ChannelGroup::Unassigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ChannelClassifier {
        ChannelClassifier::new(SourceCategories::builtin()).expect("patterns compile")
    }

    #[test]
    fn direct_requires_direct_source_and_empty_medium() {
        let c = classifier();
        assert_eq!(c.classify("(direct)", "(none)", "(none)"), ChannelGroup::Direct);
        assert_eq!(c.classify("(direct)", "(not set)", "(none)"), ChannelGroup::Direct);
        assert_ne!(c.classify("(direct)", "referral", "(none)"), ChannelGroup::Direct);
    }

    #[test]
    fn paid_social_wins_over_paid_search_and_paid_other() {
        let c = classifier();
        assert_eq!(c.classify("facebook", "cpc", "(none)"), ChannelGroup::PaidSocial);
        assert_eq!(c.classify("google", "cpc", "(none)"), ChannelGroup::PaidSearch);
        assert_eq!(c.classify("youtube", "paid_video", "(none)"), ChannelGroup::PaidVideo);
        assert_eq!(c.classify("amazon", "ppc", "(none)"), ChannelGroup::PaidShopping);
        assert_eq!(c.classify("google", "cpc", "summer_shopping"), ChannelGroup::PaidShopping);
    }

    #[test]
    fn paid_other_is_fallthrough_for_uncategorised_sources() {
        let c = classifier();
        assert_eq!(c.classify("outbrain", "cpc", "(none)"), ChannelGroup::PaidOther);
        assert_eq!(c.classify("criteo", "retargeting", "(none)"), ChannelGroup::PaidOther);
        // cpm is both a paid medium and a display medium; display comes first.
        assert_eq!(c.classify("dv360", "cpm", "(none)"), ChannelGroup::Display);
    }

    #[test]
    fn cross_network_skips_referrals() {
        let c = classifier();
        assert_eq!(
            c.classify("google", "cpc", "pmax-cross-network"),
            ChannelGroup::CrossNetwork
        );
        assert_eq!(
            c.classify("partner.com", "referral", "cross-network"),
            ChannelGroup::Referral
        );
    }

    #[test]
    fn organic_rules() {
        let c = classifier();
        assert_eq!(c.classify("google", "organic", "(none)"), ChannelGroup::OrganicSearch);
        assert_eq!(c.classify("duckduckgo", "referral", "(none)"), ChannelGroup::OrganicSearch);
        assert_eq!(c.classify("t.co", "referral", "(none)"), ChannelGroup::OrganicSocial);
        assert_eq!(c.classify("blog", "social media", "(none)"), ChannelGroup::OrganicSocial);
        assert_eq!(c.classify("vimeo.com", "referral", "(none)"), ChannelGroup::OrganicVideo);
        assert_eq!(c.classify("partner", "embedded-video", "(none)"), ChannelGroup::OrganicVideo);
        assert_eq!(c.classify("etsy", "referral", "(none)"), ChannelGroup::OrganicShopping);
        assert_eq!(c.classify("blog", "(none)", "shop-the-look"), ChannelGroup::OrganicShopping);
    }

    #[test]
    fn shopping_campaign_pattern_ignores_words_ending_in_shop() {
        let c = classifier();
        // "workshop": the letter before "shop" is in [a-df-z].
        assert_eq!(c.classify("blog", "referral", "workshop"), ChannelGroup::Referral);
        assert_eq!(c.classify("blog", "referral", "eshop"), ChannelGroup::OrganicShopping);
    }

    #[test]
    fn tail_rules() {
        let c = classifier();
        assert_eq!(c.classify("partner.com", "referral", "(none)"), ChannelGroup::Referral);
        assert_eq!(c.classify("partner", "link", "(none)"), ChannelGroup::Referral);
        assert_eq!(c.classify("newsletter", "email", "(none)"), ChannelGroup::Email);
        assert_eq!(c.classify("e-mail", "(none)", "(none)"), ChannelGroup::Email);
        assert_eq!(c.classify("awin", "affiliate", "(none)"), ChannelGroup::Affiliates);
        assert_eq!(c.classify("spotify", "audio", "(none)"), ChannelGroup::Audio);
        assert_eq!(c.classify("twilio", "sms", "(none)"), ChannelGroup::Sms);
        assert_eq!(c.classify("firebase", "(none)", "(none)"), ChannelGroup::MobilePushNotifications);
        assert_eq!(c.classify("app", "web-push", "(none)"), ChannelGroup::MobilePushNotifications);
        assert_eq!(c.classify("mystery", "(none)", "(none)"), ChannelGroup::Unassigned);
    }

    #[test]
    fn classification_is_deterministic_and_first_match() {
        let c = classifier();
        for group in ChannelGroup::ALL {
            assert_eq!(group.label().parse::<ChannelGroup>().expect("parse"), group);
        }
        let matches = c.matching_rules("facebook", "cpc", "(none)");
        assert_eq!(
            matches,
            vec![ChannelGroup::PaidSocial, ChannelGroup::PaidOther, ChannelGroup::OrganicSocial]
        );
        assert_eq!(c.classify("facebook", "cpc", "(none)"), matches[0]);
        assert_eq!(
            c.classify("facebook", "cpc", "(none)"),
            c.classify("facebook", "cpc", "(none)")
        );
    }

    #[test]
    fn category_lookup_is_case_insensitive() {
        let categories = SourceCategories::from_pairs([
            ("Google", "SOURCE_CATEGORY_SEARCH"),
            ("facebook", "Social"),
        ]);
        assert!(categories.contains(CATEGORY_SEARCH, "GOOGLE"));
        assert!(categories.contains("SOURCE_CATEGORY_SOCIAL", "facebook"));
        assert!(!categories.contains(CATEGORY_VIDEO, "google"));
        assert_eq!(categories.len(), 2);
    }
}

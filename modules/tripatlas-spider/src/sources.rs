//! Compile-time extraction-module table.
//!
//! Each listing site variant (sights, restaurants, delicacies) is described
//! by one `ModuleSpec` datum — locators, field maps, pagination rules, batch
//! size — and executed by the shared pipeline engine. Adding a module means
//! adding a descriptor, not another crawler.
//!
//! Locators are CSS except where the page only identifies a block by its
//! sibling title text, which CSS cannot express; those stay XPath.

use chromium_client::Locator;
use tripatlas_common::{ItemLabel, TagKind};

/// Listing-page locators and summary field map.
pub struct ListingSpec {
    /// Item card; its presence also signals that the listing has rendered.
    pub item: Locator,
    /// Link element inside an item carrying the name text and detail href.
    pub name: Locator,
    /// `(field, locator, default)` read relative to each item card.
    pub summary_fields: &'static [(&'static str, Locator, &'static str)],
}

/// Detail-page marker and field map.
pub struct DetailSpec {
    pub marker: Locator,
    pub fields: &'static [(&'static str, Locator)],
}

pub struct PaginationSpec {
    pub next: Locator,
    /// Class fragment marking an exhausted next-page control.
    pub disabled_class: &'static str,
    /// Hard page ceiling; `None` paginates until the control disables.
    pub page_ceiling: Option<u32>,
}

/// Tag vocabulary derived from one whitespace-separated field.
pub struct TagSpec {
    pub field: &'static str,
    pub kind: TagKind,
}

/// Province-page expansion: the city filter control on a province listing.
pub struct ProvinceSpec {
    /// Container that must render before cities can be read.
    pub city_box: Locator,
    /// One element per city inside the container.
    pub city_item: Locator,
    /// The first entry is an "all cities" pseudo-item.
    pub skip_first: bool,
}

pub struct ModuleSpec {
    pub name: &'static str,
    pub label: ItemLabel,
    pub listing: ListingSpec,
    pub detail: DetailSpec,
    pub pagination: PaginationSpec,
    pub batch_size: usize,
    pub tag: Option<TagSpec>,
    /// Items are only ingested under a City already present in the graph.
    pub requires_existing_city: bool,
    /// Municipalities listed directly as cities, not provinces.
    pub special_cities: &'static [&'static str],
    /// Province seeds expand into their cities through this control.
    pub province_expansion: Option<ProvinceSpec>,
    /// Seed-file key carrying the listing URL for this module.
    pub seed_url_field: &'static str,
}

/// Municipalities and regions whose seed page is already a city listing.
const SPECIAL_CITIES: &[&str] = &["北京", "天津", "上海", "重庆", "香港", "澳门", "台湾"];

pub fn sights() -> ModuleSpec {
    ModuleSpec {
        name: "sights",
        label: ItemLabel::Sight,
        listing: ListingSpec {
            item: Locator::Css(".baseInfoModule_box__r0bkr"),
            name: Locator::Css(".titleModule_name__Li4Tv span a"),
            summary_fields: &[
                (
                    "star",
                    Locator::Css(".titleModule_name__Li4Tv span:nth-of-type(2)"),
                    "无等级",
                ),
                ("position", Locator::Css(".distanceView_box__zWu29"), ""),
                (
                    "price",
                    Locator::Css(".priceView_real-price-view__l7J6R"),
                    "",
                ),
                (
                    "heat",
                    Locator::Css(".commentInfoModule_heat-score-view__yL8zo span:nth-of-type(2)"),
                    "",
                ),
                (
                    "comment_score",
                    Locator::Css(".commentInfoModule_comment-view__LBx9p span:nth-of-type(2)"),
                    "",
                ),
                (
                    "comment_number",
                    Locator::Css(".commentInfoModule_comment-view__LBx9p span:nth-of-type(3)"),
                    "",
                ),
                ("features", Locator::Css(".rankInfoModule_box__hYVJR"), ""),
            ],
        },
        detail: DetailSpec {
            marker: Locator::Css(".baseInfoContent"),
            fields: &[
                (
                    "address",
                    Locator::Css(".baseInfoContent div:nth-of-type(1) p:nth-of-type(2)"),
                ),
                ("open_time", Locator::Css("p.baseInfoText.cursor.openTimeText")),
                ("phone_number", Locator::Css(".baseInfoText.phoneHeaderBox")),
                (
                    "introduction",
                    Locator::XPath(
                        "//*[@id=\"__next\"]/div[3]/div/div[4]/div[1]/div[2]/div/div[2]/div",
                    ),
                ),
                (
                    "open_hours",
                    Locator::XPath("//*[@id=\"__next\"]/div[3]/div/div[4]/div[1]/div[2]/div/div[4]"),
                ),
                (
                    "preferential",
                    Locator::XPath(
                        "//div[@class=\"moduleContent\"][preceding-sibling::div[@class=\"moduleTitle\" and text()=\"优待政策\"]]",
                    ),
                ),
                (
                    "facilities",
                    Locator::XPath(
                        "//div[@class=\"moduleContent\"][preceding-sibling::div[@class=\"moduleTitle\" and text()=\"服务设施\"]]",
                    ),
                ),
                (
                    "remind",
                    Locator::XPath(
                        "//div[@class=\"moduleContent\"][preceding-sibling::div[@class=\"moduleTitle\" and text()=\"必看贴士\"]]",
                    ),
                ),
            ],
        },
        pagination: PaginationSpec {
            next: Locator::Css("li.ant-pagination-next"),
            disabled_class: "disabled",
            page_ceiling: Some(2),
        },
        batch_size: 20,
        tag: Some(TagSpec {
            field: "features",
            kind: TagKind::Feature,
        }),
        requires_existing_city: false,
        special_cities: SPECIAL_CITIES,
        province_expansion: Some(ProvinceSpec {
            city_box: Locator::Css(".districtFilter_cityBox__o_JaB"),
            city_item: Locator::Css(".districtFilter_cityBox__o_JaB > div"),
            skip_first: true,
        }),
        seed_url_field: "city_url",
    }
}

pub fn restaurants() -> ModuleSpec {
    ModuleSpec {
        name: "restaurants",
        label: ItemLabel::Restaurant,
        listing: ListingSpec {
            item: Locator::Css(".rdetailbox"),
            name: Locator::Css("dl dt a"),
            summary_fields: &[
                (
                    "comment_score",
                    Locator::Css("ul.r_comment li:nth-of-type(1) a strong"),
                    "",
                ),
                (
                    "comment_number",
                    Locator::Css("ul.r_comment li:nth-of-type(3) a"),
                    "",
                ),
            ],
        },
        detail: DetailSpec {
            marker: Locator::Css("ul.s_sight_in_list.s_sight_noline.cf"),
            fields: &[
                (
                    "price_average",
                    Locator::Css(
                        "ul.s_sight_in_list.s_sight_noline.cf li:nth-of-type(1) span:nth-of-type(2) em",
                    ),
                ),
                (
                    "cooking_style",
                    Locator::Css(
                        "ul.s_sight_in_list.s_sight_noline.cf li:nth-of-type(2) span:nth-of-type(2) dd a",
                    ),
                ),
                (
                    "phone_number",
                    Locator::Css(
                        "ul.s_sight_in_list.s_sight_noline.cf li:nth-of-type(3) span:nth-of-type(2)",
                    ),
                ),
                (
                    "address",
                    Locator::Css(
                        "ul.s_sight_in_list.s_sight_noline.cf li:nth-of-type(4) span:nth-of-type(2)",
                    ),
                ),
                (
                    "open_hours",
                    Locator::Css(
                        "ul.s_sight_in_list.s_sight_noline.cf li:nth-of-type(5) span:nth-of-type(2)",
                    ),
                ),
                (
                    "introduction",
                    Locator::XPath("//*[@id=\"content\"]/div[3]/div/div[1]/div[3]/div[1]/div[1]"),
                ),
                (
                    "cuisine",
                    Locator::XPath("//*[@id=\"content\"]/div[3]/div/div[1]/div[3]/div[1]/div[2]/p"),
                ),
                (
                    "taste_score",
                    Locator::Css(".comment_show dd:nth-of-type(1) span:nth-of-type(3)"),
                ),
                (
                    "environmental_score",
                    Locator::Css(".comment_show dd:nth-of-type(2) span:nth-of-type(3)"),
                ),
                (
                    "service_score",
                    Locator::Css(".comment_show dd:nth-of-type(3) span:nth-of-type(3)"),
                ),
            ],
        },
        pagination: PaginationSpec {
            next: Locator::Css(".nextpage"),
            disabled_class: "disabled",
            page_ceiling: Some(2),
        },
        batch_size: 15,
        tag: Some(TagSpec {
            field: "cooking_style",
            kind: TagKind::CookingStyle,
        }),
        requires_existing_city: true,
        special_cities: &[],
        province_expansion: None,
        seed_url_field: "restaurant_url",
    }
}

pub fn delicacies() -> ModuleSpec {
    ModuleSpec {
        name: "delicacies",
        label: ItemLabel::Delicacy,
        listing: ListingSpec {
            item: Locator::Css(".rdetailbox"),
            name: Locator::Css("dl dt a"),
            summary_fields: &[],
        },
        detail: DetailSpec {
            // The introduction block varies by page generation; the selector
            // group tries each known variant in document order.
            marker: Locator::Css(".infotext, .desc, .introduce, .content"),
            fields: &[(
                "introduce",
                Locator::Css(".infotext, .desc, .introduce, .content"),
            )],
        },
        pagination: PaginationSpec {
            next: Locator::Css(".nextpage"),
            disabled_class: "disabled",
            page_ceiling: None,
        },
        batch_size: 15,
        tag: Some(TagSpec {
            field: "features",
            kind: TagKind::Feature,
        }),
        requires_existing_city: true,
        special_cities: &[],
        province_expansion: None,
        seed_url_field: "food_url",
    }
}

/// Seed-resolution descriptor: drive the portal search box per city name and
/// capture the popup result URL.
pub struct ResolveSpec {
    pub name: &'static str,
    pub portal_url: &'static str,
    pub search_box: Locator,
    pub search_button: Locator,
    /// Appended to the city name to steer the search.
    pub query_suffix: &'static str,
    /// Substring identifying the right popup tab.
    pub popup_pattern: &'static str,
    /// Seed-file key the derived URL is written under.
    pub derived_field: &'static str,
    /// Derive the listing URL from the captured one.
    pub derive: fn(&str) -> String,
    /// The portal tolerates a denser cadence than the listing crawls.
    pub rotate_every: u32,
}

pub fn food_resolver() -> ResolveSpec {
    ResolveSpec {
        name: "resolve-food",
        portal_url: "https://www.ctrip.com/",
        search_box: Locator::Css("#_allSearchKeyword"),
        search_button: Locator::Css("#search_button_global"),
        query_suffix: "美食",
        popup_pattern: "/restaurant/",
        derived_field: "food_url",
        derive: derive_food_url,
        rotate_every: 20,
    }
}

/// `/restaurant/` search result → `/fooditem/` listing, fragment dropped.
fn derive_food_url(captured: &str) -> String {
    let base = captured.split('#').next().unwrap_or(captured);
    base.replace("/restaurant/", "/fooditem/")
}

/// `/fooditem/` listing → `/restaurantlist/` listing, for the next stage.
pub fn derive_restaurant_url(food_url: &str) -> String {
    food_url.replace("/fooditem/", "/restaurantlist/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn food_url_derivation_strips_fragment_and_rewrites_path() {
        let got = derive_food_url("https://you.ctrip.com/restaurant/nanning702.html#overview");
        assert_eq!(got, "https://you.ctrip.com/fooditem/nanning702.html");
    }

    #[test]
    fn restaurant_url_derives_from_food_url() {
        let got = derive_restaurant_url("https://you.ctrip.com/fooditem/nanning702.html");
        assert_eq!(got, "https://you.ctrip.com/restaurantlist/nanning702.html");
    }

    #[test]
    fn module_table_is_consistent() {
        for spec in [sights(), restaurants(), delicacies()] {
            assert!(!spec.name.is_empty());
            assert!(spec.batch_size > 0);
            if let Some(tag) = &spec.tag {
                assert!(!tag.field.is_empty());
            }
        }
        // Only the sights module walks the province hierarchy.
        assert!(sights().province_expansion.is_some());
        assert!(restaurants().province_expansion.is_none());
        assert!(restaurants().requires_existing_city);
    }
}

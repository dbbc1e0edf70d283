//! Title and price extraction from the marketplace's page-JSON answer.
//!
//! The answer carries a `widgetStates` object whose values are JSON encoded
//! as strings. Price widgets are recognised by key substring; when none of
//! them yields both prices, the whole document is scanned for `<digits> ₽`.

use std::sync::LazyLock;

use pricewatch_core::error::ScrapeError;
use pricewatch_core::types::{Money, ProductInfo};
use regex::Regex;
use serde_json::Value;

/// Title used when the page names nothing.
pub const FALLBACK_TITLE: &str = "Ozon item";

const PRICE_WIDGETS: [&str; 3] = ["webprice", "webproductprices", "websale"];
const TITLE_WIDGETS: [&str; 1] = ["webproductheading"];

static PRODUCT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(www\.)?ozon\.[^/]+/.+").expect("static regex")
});
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("static regex"));
static RUBLE_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d\s\x{00A0}\x{2009}\x{202F}]*)\s*₽").expect("static regex")
});

/// Whether `url` points at a product page on one of the marketplace's domains.
pub fn is_product_url(url: &str) -> bool {
    PRODUCT_URL.is_match(url.trim())
}

/// Rewrite bare and regional hosts to `www.ozon.ru`.
pub fn to_www(url: &str) -> String {
    let (scheme, rest) = url.split_once("://").unwrap_or(("https", url));
    let (host, tail) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let host = if host.starts_with("ozon.ru")
        || (host.ends_with(".ozon.ru") && !host.starts_with("www."))
    {
        "www.ozon.ru"
    } else {
        host
    };
    format!("{scheme}://{host}{tail}")
}

/// Path plus query of `url`, without the fragment. This is what the
/// page-JSON endpoint expects in its `url` parameter.
pub fn api_path(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let path = rest.find('/').map_or("/", |i| &rest[i..]);
    let path = path.split_once('#').map_or(path, |(p, _)| p);
    path.to_string()
}

/// Extract the first number from a price label such as `"1 299,50 ₽"`.
pub fn normalize_price(text: &str) -> Option<Money> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{00A0}' | '\u{202F}' | '\u{2009}'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let found = NUMBER.captures(&cleaned)?.get(1)?;
    Money::parse(found.as_str())
}

/// Both prices a product page may show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagePrices {
    pub with_card: Option<Money>,
    pub without_card: Option<Money>,
}

impl PagePrices {
    /// The card price when known, since that is what buyers actually pay.
    pub fn for_compare(&self) -> Option<Money> {
        self.with_card.or(self.without_card)
    }
}

/// Decoded widget states, skipping values that are not JSON strings.
fn widgets(data: &Value) -> Vec<(String, Value)> {
    let Some(states) = data.get("widgetStates").and_then(Value::as_object) else {
        return Vec::new();
    };
    states
        .iter()
        .filter_map(|(key, raw)| {
            let decoded = serde_json::from_str::<Value>(raw.as_str()?).ok()?;
            Some((key.to_lowercase(), decoded))
        })
        .collect()
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

pub fn page_title(data: &Value) -> Option<String> {
    let widgets = widgets(data);

    let heading = widgets
        .iter()
        .filter(|(key, _)| TITLE_WIDGETS.iter().any(|name| key.contains(name)))
        .find_map(|(_, obj)| non_empty(obj.get("title")));
    if heading.is_some() {
        return heading;
    }

    if let Some(seo) = non_empty(data.get("seo").and_then(|s| s.get("title"))) {
        return Some(seo);
    }

    widgets.iter().find_map(|(_, obj)| {
        non_empty(obj.pointer("/cellTrackingInfo/product/title"))
            .or_else(|| non_empty(obj.pointer("/product/title")))
    })
}

fn price_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn price_of(value: Option<&Value>) -> Option<Money> {
    value.and_then(price_text).as_deref().and_then(normalize_price)
}

pub fn page_prices(data: &Value) -> PagePrices {
    let mut prices = PagePrices::default();

    for (key, obj) in widgets(data) {
        if !PRICE_WIDGETS.iter().any(|name| key.contains(name)) {
            continue;
        }
        let available = obj.get("isAvailable").and_then(Value::as_bool).unwrap_or(true);

        let mut card = obj.get("cardPrice").cloned();
        let mut plain = obj.get("price").cloned();
        if card.is_none() && plain.is_none() {
            let product = obj
                .pointer("/cellTrackingInfo/product")
                .or_else(|| obj.get("product"));
            if let Some(product) = product {
                card = product.get("cardPrice").or_else(|| product.get("finalPrice")).cloned();
                plain = product.get("price").or_else(|| product.get("originalPrice")).cloned();
            }
        }

        // Unavailable offers only fill gaps; available ones win.
        if let Some(p) = price_of(card.as_ref())
            && (prices.with_card.is_none() || available)
        {
            prices.with_card = Some(p);
        }
        if let Some(p) = price_of(plain.as_ref())
            && (prices.without_card.is_none() || available)
        {
            prices.without_card = Some(p);
        }

        if prices.with_card.is_some() && prices.without_card.is_some() {
            return prices;
        }
    }

    let dump = data.to_string();
    let mut scanned = RUBLE_AMOUNT
        .captures_iter(&dump)
        .filter_map(|c| c.get(1).and_then(|m| normalize_price(m.as_str())));
    let first = scanned.next();
    let second = scanned.next();
    if prices.with_card.is_none() {
        prices.with_card = first;
    }
    if prices.without_card.is_none() {
        prices.without_card = second;
    }
    prices
}

/// Title and comparable price, or why the page is unusable.
pub fn extract_product(data: &Value) -> Result<ProductInfo, ScrapeError> {
    let empty = match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        return Err(ScrapeError::Blocked("empty page answer".into()));
    }

    let price = page_prices(data)
        .for_compare()
        .ok_or_else(|| ScrapeError::Content("no price on page".into()))?;
    let title = page_title(data).unwrap_or_else(|| FALLBACK_TITLE.to_string());
    Ok(ProductInfo { title, price })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Page answer with widget states encoded as strings, as served.
    fn page(widgets: &[(&str, Value)], seo_title: Option<&str>) -> Value {
        let states: serde_json::Map<String, Value> = widgets
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        let mut data = json!({ "widgetStates": states });
        if let Some(t) = seo_title {
            data["seo"] = json!({ "title": t });
        }
        data
    }

    #[test]
    fn test_product_url_validation() {
        assert!(is_product_url("https://www.ozon.ru/product/kettle-123/"));
        assert!(is_product_url("  http://ozon.kz/product/x "));
        assert!(is_product_url("HTTPS://OZON.RU/t/abc"));
        assert!(!is_product_url("https://www.ozon.ru/"));
        assert!(!is_product_url("https://example.com/ozon.ru/product"));
        assert!(!is_product_url("ozon.ru/product/1"));
    }

    #[test]
    fn test_to_www() {
        assert_eq!(to_www("https://ozon.ru/product/1/"), "https://www.ozon.ru/product/1/");
        assert_eq!(to_www("https://m.ozon.ru/product/1"), "https://www.ozon.ru/product/1");
        assert_eq!(to_www("https://www.ozon.ru/product/1"), "https://www.ozon.ru/product/1");
        assert_eq!(to_www("https://ozon.kz/product/1"), "https://ozon.kz/product/1");
    }

    #[test]
    fn test_api_path() {
        assert_eq!(
            api_path("https://www.ozon.ru/product/kettle-1/?sh=abc#reviews"),
            "/product/kettle-1/?sh=abc"
        );
        assert_eq!(api_path("https://www.ozon.ru"), "/");
    }

    #[test]
    fn test_normalize_price() {
        assert_eq!(normalize_price("1\u{2009}299 ₽"), Some(Money::from_major(1299)));
        assert_eq!(normalize_price("12\u{00A0}345,50 ₽"), Some(Money::from_minor(1_234_550)));
        assert_eq!(normalize_price("от 990"), Some(Money::from_major(990)));
        assert_eq!(normalize_price("₽"), None);
        assert_eq!(normalize_price("0 ₽"), None);
    }

    #[test]
    fn test_prices_from_price_widget() {
        let data = page(
            &[(
                "webPrice-3121879-default-1",
                json!({ "cardPrice": "1 099 ₽", "price": "1 199 ₽", "isAvailable": true }),
            )],
            None,
        );
        let prices = page_prices(&data);
        assert_eq!(prices.with_card, Some(Money::from_major(1099)));
        assert_eq!(prices.without_card, Some(Money::from_major(1199)));
        assert_eq!(prices.for_compare(), Some(Money::from_major(1099)));
    }

    #[test]
    fn test_prices_from_nested_product() {
        let data = page(
            &[(
                "webSale-100-default-1",
                json!({ "cellTrackingInfo": { "product": { "finalPrice": 850, "price": 999 } } }),
            )],
            None,
        );
        let prices = page_prices(&data);
        assert_eq!(prices.with_card, Some(Money::from_major(850)));
        assert_eq!(prices.without_card, Some(Money::from_major(999)));
    }

    #[test]
    fn test_unavailable_offer_does_not_override() {
        let data = page(
            &[
                ("webPrice-1", json!({ "cardPrice": "500 ₽", "isAvailable": true })),
                (
                    "webPrice-2",
                    json!({ "cardPrice": "400 ₽", "price": "450 ₽", "isAvailable": false }),
                ),
            ],
            None,
        );
        let prices = page_prices(&data);
        assert_eq!(prices.with_card, Some(Money::from_major(500)));
        assert_eq!(prices.without_card, Some(Money::from_major(450)));
    }

    #[test]
    fn test_ruble_scan_fallback() {
        let data = page(
            &[("webOutOfStock-1", json!({ "text": "Было 2 490 ₽, сейчас 1 990 ₽" }))],
            None,
        );
        let prices = page_prices(&data);
        assert_eq!(prices.with_card, Some(Money::from_major(2490)));
        assert_eq!(prices.without_card, Some(Money::from_major(1990)));
    }

    #[test]
    fn test_title_preference() {
        let heading = page(
            &[("webProductHeading-1", json!({ "title": "  Чайник  " }))],
            Some("SEO title"),
        );
        assert_eq!(page_title(&heading).as_deref(), Some("Чайник"));

        let seo = page(&[("webGallery-1", json!({}))], Some("SEO title"));
        assert_eq!(page_title(&seo).as_deref(), Some("SEO title"));

        let tracked = page(
            &[(
                "webAddToCart-1",
                json!({ "cellTrackingInfo": { "product": { "title": "Tracked" } } }),
            )],
            None,
        );
        assert_eq!(page_title(&tracked).as_deref(), Some("Tracked"));
        assert_eq!(page_title(&page(&[], None)), None);
    }

    #[test]
    fn test_extract_product() {
        let data = page(&[("webPrice-1", json!({ "price": "1 500 ₽" }))], None);
        let info = extract_product(&data).unwrap();
        assert_eq!(info.title, FALLBACK_TITLE);
        assert_eq!(info.price, Money::from_major(1500));

        let no_price = page(&[("webGallery-1", json!({ "images": [] }))], Some("Lamp"));
        assert!(matches!(extract_product(&no_price), Err(ScrapeError::Content(_))));
        assert!(matches!(extract_product(&json!({})), Err(ScrapeError::Blocked(_))));
    }
}

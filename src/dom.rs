//! Page-side scripts evaluated through headless_chrome.
//!
//! Every script is a function literal applied to JSON-encoded arguments, so
//! selectors and values never need hand-escaping.

use anyhow::Result;
use headless_chrome::Tab;

/// Clears an input before typing into it. Returns `"missing"` if nothing matches.
pub const CLEAR_JS: &str = r#"
(sel) => {
  const el = document.querySelector(sel);
  if (!el) return 'missing';
  el.focus();
  el.value = '';
  el.dispatchEvent(new Event('input', { bubbles: true }));
  return 'ok';
}
"#;

/// Picks an option by value, then exact label, then label substring.
pub const SELECT_JS: &str = r#"
(sel, wanted) => {
  const el = document.querySelector(sel);
  if (!el) return 'missing';
  if (!el.options) return 'not-a-select';
  const w = wanted.trim().toLowerCase();
  const opts = [...el.options];
  const opt = opts.find(o => o.value === wanted)
    || opts.find(o => o.text.trim().toLowerCase() === w)
    || opts.find(o => o.text.trim().toLowerCase().includes(w));
  if (!opt) return 'no-option';
  el.value = opt.value;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return 'ok';
}
"#;

/// Clicks a checkbox or radio only when its state differs from the wanted one.
pub const CHECK_JS: &str = r#"
(sel, wanted) => {
  const el = document.querySelector(sel);
  if (!el) return 'missing';
  const want = wanted === 'true';
  if (el.checked !== want) el.click();
  return el.checked === want ? 'ok' : 'stuck';
}
"#;

pub const SCROLL_JS: &str = r#"
(dy) => { window.scrollBy(0, Number(dy)); return 'ok'; }
"#;

/// `readyState:resourceCount`, sampled repeatedly to detect a quiet network.
pub const IDLE_PROBE_JS: &str = r#"
() => document.readyState + ':' + performance.getEntriesByType('resource').length
"#;

/// Builds `(<function>)(<args as JSON strings>)`.
pub fn invoke(function: &str, args: &[&str]) -> String {
    let args: Vec<String> = args
        .iter()
        .map(|a| serde_json::Value::String((*a).to_string()).to_string())
        .collect();
    format!("({})({})", function.trim(), args.join(", "))
}

/// Evaluate a script and read its result as a string (empty when not a string).
pub fn eval_string(tab: &Tab, script: &str) -> Result<String> {
    let result = tab.evaluate(script, false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default())
}

/// Get the current page URL.
pub fn get_current_url(tab: &Tab) -> Result<String> {
    let url = eval_string(tab, "window.location.href")?;
    if url.is_empty() {
        return Ok(tab.get_url());
    }
    Ok(url)
}

/// Get the current page title.
pub fn get_page_title(tab: &Tab) -> Result<String> {
    let title = eval_string(tab, "document.title")?;
    Ok(if title.is_empty() {
        "untitled".to_string()
    } else {
        title
    })
}

/// Parse an `IDLE_PROBE_JS` sample into `(document complete, resource count)`.
pub fn parse_idle_probe(sample: &str) -> Option<(bool, u64)> {
    let (state, count) = sample.split_once(':')?;
    Some((state == "complete", count.parse().ok()?))
}

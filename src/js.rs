//! In-page JavaScript payloads. These are data to the rest of the crate:
//! string constants handed to `Runtime.evaluate` / `Runtime.callFunctionOn`.

/// Summarize the page for `PageInfo`.
pub const PAGE_INFO: &str = r#"(function() {
    return {
        url: location.href,
        title: document.title,
        width: window.innerWidth,
        height: window.innerHeight,
    };
})()"#;

/// Compute the css path of `this`, rooted at `body`: `#id` anchors where
/// available, `tag:nth-of-type(k)` otherwise.
pub const DOM_PATH: &str = r#"function() {
    const parts = [];
    let el = this;
    while (el && el.nodeType === Node.ELEMENT_NODE && el !== document.body) {
        if (el.id) {
            parts.unshift('#' + CSS.escape(el.id));
            return parts.join(' > ');
        }
        const tag = el.tagName.toLowerCase();
        let k = 1;
        let sib = el;
        while ((sib = sib.previousElementSibling)) {
            if (sib.tagName === el.tagName) k++;
        }
        parts.unshift(tag + ':nth-of-type(' + k + ')');
        el = el.parentElement;
    }
    parts.unshift('body');
    return parts.join(' > ');
}"#;

/// Whether the document body has any child elements at all. Guards the
/// fallback extraction: an empty body means there is nothing to find.
pub const BODY_HAS_ELEMENTS: &str =
    "!!(document.body && document.body.childElementCount > 0)";

/// The selector union used when the accessibility tree yields nothing.
pub const FALLBACK_SELECTOR: &str = "a[href], button, input, select, textarea, \
[role=button], [role=link], [role=textbox], [role=checkbox], [role=radio], \
[role=combobox], [role=menuitem], [role=tab], [role=switch], \
[tabindex]:not([tabindex=\"-1\"])";

/// Describe `this` for fallback synthesis: tag, input type, and the
/// aria-label / placeholder / title / innerText name ladder.
pub const FALLBACK_DESCRIBE: &str = r#"function() {
    const tag = this.tagName.toLowerCase();
    const name = this.getAttribute('aria-label')
        || this.getAttribute('placeholder')
        || this.getAttribute('title')
        || (this.innerText || '').slice(0, 50);
    return { tag, inputType: (this.getAttribute('type') || '').toLowerCase(), name };
}"#;

/// Probe and fill `this`: contenteditable gets innerText + input event;
/// native inputs go through the prototype value setter so framework-managed
/// fields observe the change, then bubbling input and change events.
/// Returns whether the value persisted.
pub const FILL_VALUE: &str = r#"function(value) {
    if (this.isContentEditable) {
        this.focus();
        this.innerText = value;
        this.dispatchEvent(new Event('input', { bubbles: true }));
        return this.innerText === value;
    }
    this.focus();
    let proto = null;
    if (this instanceof HTMLInputElement) proto = HTMLInputElement.prototype;
    else if (this instanceof HTMLTextAreaElement) proto = HTMLTextAreaElement.prototype;
    const desc = proto && Object.getOwnPropertyDescriptor(proto, 'value');
    if (desc && desc.set) {
        desc.set.call(this, value);
    } else {
        this.value = value;
    }
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
    return this.value === value;
}"#;

/// Scroll with `this` as the anchor element: walk upward for a scrollable
/// ancestor, fall back to the viewport scroller when none exists.
pub const SCROLL_FROM_ELEMENT: &str = r#"function(direction, amount) {
    const apply = (container, fallback) => {
        const before = container.scrollTop;
        if (amount === 'to-top') {
            container.scrollTop = 0;
        } else if (amount === 'to-bottom') {
            container.scrollTop = Math.max(0, container.scrollHeight - container.clientHeight);
        } else {
            const delta = amount === 'page' ? container.clientHeight : Number(amount);
            container.scrollTop = before + (direction === 'up' ? -delta : delta);
        }
        return {
            scrollTopBefore: before,
            scrollTopAfter: container.scrollTop,
            scrollHeight: container.scrollHeight,
            clientHeight: container.clientHeight,
            containerTag: container.tagName.toLowerCase(),
            fallback: fallback,
        };
    };
    let el = this;
    while (el && el !== document.documentElement) {
        const style = getComputedStyle(el);
        if ((style.overflowY === 'auto' || style.overflowY === 'scroll')
            && el.scrollHeight > el.clientHeight) {
            return apply(el, false);
        }
        el = el.parentElement;
    }
    return apply(document.scrollingElement || document.documentElement || document.body, true);
}"#;

/// Scroll the viewport scroller directly.
pub const SCROLL_VIEWPORT: &str = r#"function(direction, amount) {
    const container = document.scrollingElement || document.documentElement || document.body;
    const before = container.scrollTop;
    if (amount === 'to-top') {
        container.scrollTop = 0;
    } else if (amount === 'to-bottom') {
        container.scrollTop = Math.max(0, container.scrollHeight - container.clientHeight);
    } else {
        const delta = amount === 'page' ? container.clientHeight : Number(amount);
        container.scrollTop = before + (direction === 'up' ? -delta : delta);
    }
    return {
        scrollTopBefore: before,
        scrollTopAfter: container.scrollTop,
        scrollHeight: container.scrollHeight,
        clientHeight: container.clientHeight,
        containerTag: container.tagName.toLowerCase(),
        fallback: false,
    };
}"#;

/// Install a buffered layout-shift observer writing into a window-scoped
/// accumulator. Entries caused by recent input are ignored.
pub const INSTALL_LAYOUT_SHIFT_OBSERVER: &str = r#"(function() {
    const state = { total: 0, count: 0, observer: null };
    window.__layoutShift = state;
    try {
        const observer = new PerformanceObserver((list) => {
            for (const entry of list.getEntries()) {
                if (entry.hadRecentInput) continue;
                state.total += entry.value;
                state.count += 1;
            }
        });
        observer.observe({ type: 'layout-shift', buffered: true });
        state.observer = observer;
        return true;
    } catch (e) {
        return false;
    }
})()"#;

/// Read the accumulated layout shift and disconnect the observer.
pub const COLLECT_LAYOUT_SHIFT: &str = r#"(function() {
    const state = window.__layoutShift;
    if (!state) return { cls: 0, count: 0 };
    if (state.observer) {
        try { state.observer.disconnect(); } catch (e) {}
    }
    delete window.__layoutShift;
    return { cls: state.total, count: state.count };
})()"#;

/// Render `(<function>)(arg, …)` with json-encoded arguments, for snippets
/// that have to run through `Runtime.evaluate` instead of `callFunctionOn`.
pub fn call_expression(function: &str, args: &[serde_json::Value]) -> String {
    let args = args
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("({function})({args})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_expression_encodes_arguments() {
        let expr = call_expression("function(a, b) {}", &[json!("down"), json!(42)]);
        assert_eq!(expr, "(function(a, b) {})(\"down\", 42)");

        // strings with quotes survive as valid js literals
        let expr = call_expression("f", &[json!(r#"say "hi""#)]);
        assert_eq!(expr, r#"(f)("say \"hi\"")"#);
    }
}

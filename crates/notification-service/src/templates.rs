//! 邮件模板注册表
//!
//! 支持 `{{ variable }}` 语法，变量值做 HTML 转义后替换。
//! 内置一组默认模板，可从目录加载同名 `{id}.html` 文件覆盖。

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::Metadata;

/// 匹配 `{{name}}` 或 `{{ name }}`，变量名支持字母、数字、下划线
static VARIABLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("模板变量正则非法"));

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("模板未找到: {0}")]
    NotFound(String),

    #[error("模板 {template} 缺少变量: {variable}")]
    MissingVariable { template: String, variable: String },

    #[error("模板加载失败: {0}")]
    Load(#[from] std::io::Error),
}

/// 模板注册表
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
}

impl TemplateRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带有内置模板的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (id, body) in DEFAULT_TEMPLATES {
            registry.register(*id, *body);
        }
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(id.into(), body.into());
    }

    /// 从目录加载 `*.html`，文件名（去掉扩展名）即模板 id，返回加载数量
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, TemplateError> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let body = std::fs::read_to_string(&path)?;
            debug!(template = id, path = %path.display(), "加载模板文件");
            self.register(id, body);
            loaded += 1;
        }
        info!(dir = %dir.as_ref().display(), loaded, "模板目录加载完成");
        Ok(loaded)
    }

    pub fn lookup(&self, id: &str) -> Option<&str> {
        self.templates.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// 渲染模板
    ///
    /// 模板中引用但未提供的变量视为渲染失败，不会输出未替换的占位符。
    pub fn render(&self, id: &str, variables: &Metadata) -> Result<String, TemplateError> {
        let template = self
            .lookup(id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;

        if let Some(missing) = VARIABLE_REGEX
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .find(|name| !variables.contains_key(name))
        {
            return Err(TemplateError::MissingVariable {
                template: id.to_string(),
                variable: missing,
            });
        }

        let rendered = VARIABLE_REGEX.replace_all(template, |caps: &regex::Captures| {
            variables
                .get(&caps[1])
                .map(|v| escape_html(&v.to_string()))
                .unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

/// HTML 转义
fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// 内置模板
// ---------------------------------------------------------------------------

macro_rules! html_template {
    ($title:literal, $body:literal) => {
        concat!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"><title>",
            $title,
            "</title></head>\n<body>\n",
            "<div style=\"font-family: Arial, sans-serif; line-height: 1.6;\n",
            " color: #333; max-width: 600px; margin: 0 auto;\">\n",
            $body,
            "\n<p style=\"color: #666; font-size: 12px;\">\n",
            "This is an automated message, please do not reply.</p>\n",
            "</div>\n</body>\n</html>\n"
        )
    };
}

static DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (
        "order_confirmation",
        html_template!(
            "Order Confirmation",
            "<h1>Order Confirmed!</h1>\n<p>Thank you for your order #{{ order_id }}.</p>\n<p>Items ({{ item_count }}): {{ items }}</p>\n<p><strong>Total: ${{ total }}</strong></p>\n<p>We'll email you again when your order ships.</p>"
        ),
    ),
    (
        "order_shipped",
        html_template!(
            "Order Shipped",
            "<h1>Your order is on its way!</h1>\n<p>Order #{{ order_id }} has shipped.</p>\n<p>Items: {{ items }}</p>"
        ),
    ),
    (
        "order_delivered",
        html_template!(
            "Order Delivered",
            "<h1>Delivered</h1>\n<p>Order #{{ order_id }} has been delivered. Enjoy!</p>"
        ),
    ),
    (
        "order_cancelled",
        html_template!(
            "Order Cancelled",
            "<h1>Order Cancelled</h1>\n<p>Order #{{ order_id }} has been cancelled.\nAny payment will be refunded.</p>"
        ),
    ),
    (
        "welcome",
        html_template!(
            "Welcome!",
            "<h1>Welcome, {{ name }}!</h1>\n<p>We're thrilled to have you join our community.</p>"
        ),
    ),
    (
        "password_reset",
        html_template!(
            "Password Reset",
            "<h1>Password Reset Request</h1>\n<p>Use the link below to reset your password:</p>\n<p><a href=\"{{ reset_link }}\">{{ reset_link }}</a></p>\n<p>If you did not request this, you can ignore this email.</p>"
        ),
    ),
    (
        "low_stock_alert",
        html_template!(
            "Low Stock Alert",
            "<h1>Low Stock Alert</h1>\n<p>{{ product_name }} ({{ product_id }}) has {{ quantity }} units left,\nbelow the threshold of {{ threshold }}.</p>"
        ),
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataValue;

    fn vars(pairs: &[(&str, MetadataValue)]) -> Metadata {
        let mut metadata = Metadata::new();
        for (k, v) in pairs {
            metadata.insert(k.to_string(), v.clone());
        }
        metadata
    }

    #[test]
    fn test_defaults_cover_all_event_templates() {
        let registry = TemplateRegistry::with_defaults();
        for id in [
            "order_confirmation",
            "order_shipped",
            "order_delivered",
            "order_cancelled",
            "welcome",
            "password_reset",
            "low_stock_alert",
        ] {
            assert!(registry.contains(id), "缺少内置模板 {id}");
        }
        assert!(registry.lookup("unknown").is_none());
    }

    #[test]
    fn test_render_substitutes_and_escapes() {
        let mut registry = TemplateRegistry::new();
        registry.register("greet", "<p>Hi {{name}}, you have {{ count }} items</p>");

        let rendered = registry
            .render(
                "greet",
                &vars(&[
                    ("name", MetadataValue::from("<Ada & Bob>")),
                    ("count", MetadataValue::Integer(3)),
                ]),
            )
            .unwrap();
        assert_eq!(
            rendered,
            "<p>Hi &lt;Ada &amp; Bob&gt;, you have 3 items</p>"
        );
    }

    #[test]
    fn test_render_missing_variable_fails() {
        let registry = TemplateRegistry::with_defaults();
        let err = registry.render("welcome", &Metadata::new()).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::MissingVariable { ref variable, .. } if variable == "name"
        ));
    }

    #[test]
    fn test_render_not_found() {
        let registry = TemplateRegistry::new();
        assert!(matches!(
            registry.render("nope", &Metadata::new()),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[test]
    fn test_low_stock_template_renders() {
        let registry = TemplateRegistry::with_defaults();
        let rendered = registry
            .render(
                "low_stock_alert",
                &vars(&[
                    ("product_id", MetadataValue::from("P1")),
                    ("product_name", MetadataValue::from("Widget")),
                    ("quantity", MetadataValue::Integer(2)),
                    ("threshold", MetadataValue::Integer(10)),
                ]),
            )
            .unwrap();
        assert!(rendered.contains("Widget (P1) has 2 units left"));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn test_load_dir_overrides_builtin() {
        let dir = std::env::temp_dir().join(format!("dispatch-templates-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("welcome.html"), "Hello {{ name }}").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut registry = TemplateRegistry::with_defaults();
        assert_eq!(registry.load_dir(&dir).unwrap(), 1);
        let rendered = registry
            .render("welcome", &vars(&[("name", MetadataValue::from("Ada"))]))
            .unwrap();
        assert_eq!(rendered, "Hello Ada");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_dir_missing_is_error() {
        let mut registry = TemplateRegistry::new();
        assert!(matches!(
            registry.load_dir("/nonexistent/templates"),
            Err(TemplateError::Load(_))
        ));
    }
}

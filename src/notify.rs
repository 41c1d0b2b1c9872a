use anyhow::{Context, Result};

use crate::booking::BookedOrder;

/// Push-notification capability. Fire-and-forget from the caller's point of
/// view: a failed send is logged and swallowed, never a booking failure.
pub trait Notifier {
    async fn send(&self, title: &str, body: &str, short: &str) -> Result<()>;
}

/// ServerChan (sctapi.ftqq.com) push channel.
pub struct ServerChan {
    client: reqwest::Client,
    key: Option<String>,
}

impl ServerChan {
    pub fn new(key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            key,
        }
    }
}

impl Notifier for ServerChan {
    async fn send(&self, title: &str, body: &str, short: &str) -> Result<()> {
        let Some(ref key) = self.key else {
            tracing::info!("no push key configured, skipping notification");
            return Ok(());
        };

        let url = format!("https://sctapi.ftqq.com/{key}.send");
        let params = [
            ("title", title),
            ("desp", body),
            ("short", short),
            ("noip", "1"),
        ];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .context("push request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("push endpoint returned {status}");
        }

        let payload: serde_json::Value =
            response.json().await.context("push response unreadable")?;
        if payload.get("code").and_then(|c| c.as_i64()) != Some(0) {
            let message = payload
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown");
            anyhow::bail!("push rejected: {message}");
        }

        tracing::info!("notification sent");
        Ok(())
    }
}

/// Message for a committed order: title, markdown body, short summary.
pub fn booked_message(order: &BookedOrder) -> (String, String, String) {
    let title = "场地预约成功，请及时支付！".to_string();
    let body = format!(
        "### 预约信息\n\
         - 场馆：{venue}\n\
         - 场地：{item}\n\
         - 日期：{date}\n\
         - 时间：{hour}:00\n\
         \n\
         ### 注意事项\n\
         1. 请在15分钟内完成支付，否则订单将自动取消\n\
         2. 请确保账户余额充足\n\
         3. 如需取消预约，请提前操作\n",
        venue = order.venue,
        item = order.item,
        date = order.date,
        hour = order.start_hour,
    );
    let short = format!("已预约{}{}，请在15分钟内支付", order.venue, order.item);
    (title, body, short)
}

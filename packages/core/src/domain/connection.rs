//! Room 購読の状態機械と再接続バックオフ
//!
//! 副作用を持たない純粋なロジックのみを定義し、実際の購読管理は
//! `usecase::room_coordinator` が行います。
//!
//! ```text
//! Idle → Subscribing → Subscribed → (Disconnected ⇄ Reconnecting) → Subscribed
//!                  ↘            ↘                ↘
//!                   Unsubscribed（退出、終端状態）
//! ```

use std::time::Duration;

use super::error::InvalidTransition;

/// Room 購読の状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Subscribing,
    Subscribed,
    /// `failed_attempts` はこの切断までに失敗した再接続の回数
    Disconnected { reason: String, failed_attempts: u32 },
    /// `attempt` は 1 始まりの再接続試行回数
    Reconnecting { attempt: u32 },
    Unsubscribed,
}

/// 状態遷移のきっかけ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTrigger {
    /// 入室
    Enter,
    /// バックエンドが購読を確認した
    Confirmed,
    /// 通信路の障害
    TransportFailed { reason: String },
    /// バックオフ後に再購読を開始
    RetryStarted,
    /// 退出
    Leave,
}

/// UI・購読者向けの接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    Reconnecting,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl SubscriptionState {
    /// 状態遷移
    ///
    /// `Leave` は終端状態以外のどこからでも受け付ける。
    /// `Subscribing` 中の障害は `Disconnected` として扱い、再接続ループに入る。
    pub fn transition(&self, trigger: LinkTrigger) -> Result<SubscriptionState, InvalidTransition> {
        use LinkTrigger as T;
        use SubscriptionState as S;

        let next = match (self, &trigger) {
            (S::Unsubscribed, _) => None,
            (_, T::Leave) => Some(S::Unsubscribed),
            (S::Idle, T::Enter) => Some(S::Subscribing),
            (S::Subscribing | S::Reconnecting { .. }, T::Confirmed) => Some(S::Subscribed),
            (S::Subscribing | S::Subscribed | S::Reconnecting { .. }, T::TransportFailed { reason }) => {
                Some(S::Disconnected {
                    reason: reason.clone(),
                    failed_attempts: self.failed_attempts(),
                })
            }
            (S::Disconnected { .. }, T::RetryStarted) => Some(S::Reconnecting {
                attempt: self.failed_attempts() + 1,
            }),
            _ => None,
        };

        next.ok_or(InvalidTransition {
            from: self.clone(),
            trigger,
        })
    }

    /// 外部に公開する接続状態
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Idle | Self::Subscribing => ConnectionStatus::Connecting,
            Self::Subscribed => ConnectionStatus::Connected,
            Self::Disconnected { .. } | Self::Unsubscribed => ConnectionStatus::Disconnected,
            Self::Reconnecting { .. } => ConnectionStatus::Reconnecting,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Unsubscribed)
    }

    fn failed_attempts(&self) -> u32 {
        match self {
            Self::Reconnecting { attempt } => *attempt,
            Self::Disconnected {
                failed_attempts, ..
            } => *failed_attempts,
            _ => 0,
        }
    }
}

/// 再接続バックオフの設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// 指数バックオフ（上限あり、諦めない）
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl ReconnectBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// 次の待ち時間を返し、失敗回数を進める
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.policy.multiplier.max(1.0).powi(self.failures.min(32) as i32);
        let millis = (self.policy.initial.as_millis() as f64 * factor)
            .min(self.policy.max.as_millis() as f64);
        self.failures = self.failures.saturating_add(1);
        Duration::from_millis(millis as u64)
    }

    /// 購読成功時にリセット
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

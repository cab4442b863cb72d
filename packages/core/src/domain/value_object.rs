//! 値オブジェクト
//!
//! ID やタイムスタンプなど、不変で等価性によって比較される値を定義します。

use std::fmt;

use super::error::ValueObjectError;

/// Room ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    /// 新しい RoomId を作成（空文字列は不可）
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        if value.trim().is_empty() {
            return Err(ValueObjectError::RoomIdEmpty);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    /// 新しい UserId を作成（空文字列は不可）
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        if value.trim().is_empty() {
            return Err(ValueObjectError::UserIdEmpty);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// メッセージ ID
///
/// 送信直後のメッセージはクライアントが生成した `Pending` ID を持ち、
/// バックエンドの確認後に `Confirmed` ID を持つメッセージへ置き換えられる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// ローカルで楽観的に追加されたメッセージ
    Pending { local_id: String },
    /// バックエンドが採番したメッセージ
    Confirmed { id: String },
}

impl MessageId {
    /// バックエンド採番の ID を作成（空文字列は不可）
    pub fn confirmed(id: String) -> Result<Self, ValueObjectError> {
        if id.trim().is_empty() {
            return Err(ValueObjectError::MessageIdEmpty);
        }
        Ok(Self::Confirmed { id })
    }

    /// ローカル ID を作成（空文字列は不可）
    pub fn pending(local_id: String) -> Result<Self, ValueObjectError> {
        if local_id.trim().is_empty() {
            return Err(ValueObjectError::MessageIdEmpty);
        }
        Ok(Self::Pending { local_id })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending { local_id } => local_id,
            Self::Confirmed { id } => id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending { local_id } => write!(f, "pending:{}", local_id),
            Self::Confirmed { id } => f.write_str(id),
        }
    }
}

/// Unix タイムスタンプ（UTC, ミリ秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// 再生速度
///
/// 選択可能な値は 0.5x / 1x / 1.5x / 2x のみ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackRate {
    Half,
    #[default]
    Normal,
    OneAndHalf,
    Double,
}

impl PlaybackRate {
    pub const ALL: [PlaybackRate; 4] = [
        PlaybackRate::Half,
        PlaybackRate::Normal,
        PlaybackRate::OneAndHalf,
        PlaybackRate::Double,
    ];

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Half => 0.5,
            Self::Normal => 1.0,
            Self::OneAndHalf => 1.5,
            Self::Double => 2.0,
        }
    }

    /// 次の速度（UI の速度切り替えボタン用、2x の次は 0.5x）
    pub fn next(&self) -> Self {
        match self {
            Self::Half => Self::Normal,
            Self::Normal => Self::OneAndHalf,
            Self::OneAndHalf => Self::Double,
            Self::Double => Self::Half,
        }
    }
}

impl TryFrom<f64> for PlaybackRate {
    type Error = ValueObjectError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|rate| (rate.as_f64() - value).abs() < f64::EPSILON)
            .ok_or(ValueObjectError::UnsupportedPlaybackRate(value))
    }
}

impl fmt::Display for PlaybackRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_rejects_blank() {
        // テスト項目: 空白のみの RoomId は作成できない
        // given (前提条件):
        let value = "   ".to_string();

        // when (操作):
        let result = RoomId::new(value);

        // then (期待する結果):
        assert_eq!(result, Err(ValueObjectError::RoomIdEmpty));
    }

    #[test]
    fn test_pending_and_confirmed_ids_are_distinct() {
        // テスト項目: 同じ文字列でも Pending と Confirmed は別の ID として扱われる
        // given (前提条件):
        let pending = MessageId::pending("abc".to_string()).unwrap();
        let confirmed = MessageId::confirmed("abc".to_string()).unwrap();

        // when (操作):
        let equal = pending == confirmed;

        // then (期待する結果):
        assert!(!equal);
        assert!(pending.is_pending());
        assert!(!confirmed.is_pending());
        assert_eq!(pending.as_str(), confirmed.as_str());
    }

    #[test]
    fn test_playback_rate_from_supported_values() {
        // テスト項目: 対応している速度の数値から PlaybackRate に変換できる
        // given (前提条件):
        let values = [0.5, 1.0, 1.5, 2.0];

        // when (操作):
        let rates: Vec<PlaybackRate> = values
            .into_iter()
            .map(|v| PlaybackRate::try_from(v).unwrap())
            .collect();

        // then (期待する結果):
        assert_eq!(rates, PlaybackRate::ALL.to_vec());
    }

    #[test]
    fn test_playback_rate_rejects_unsupported_value() {
        // テスト項目: 対応していない速度はエラーになる
        // given (前提条件):
        let value = 1.25;

        // when (操作):
        let result = PlaybackRate::try_from(value);

        // then (期待する結果):
        assert_eq!(result, Err(ValueObjectError::UnsupportedPlaybackRate(1.25)));
    }

    #[test]
    fn test_playback_rate_next_cycles() {
        // テスト項目: 速度切り替えが 2x の次に 0.5x へ戻る
        // given (前提条件):
        let rate = PlaybackRate::Double;

        // when (操作):
        let next = rate.next();

        // then (期待する結果):
        assert_eq!(next, PlaybackRate::Half);
        assert_eq!(next.next(), PlaybackRate::Normal);
    }
}

// Keyword-matched replies for ordinary (non-planning) chat.

const GREETING: &str = "こんにちは！どうぞお話しください。LP企画設計をご希望の場合は、「LP企画: 商品名やテーマ」のように入力してください。CSVファイルとSVGファイルをアップロードすることもできます。";

const LP_HINT: &str =
    "LP企画設計機能を使うには「LP企画: あなたの商品やサービスのテーマ」のように入力してください。";

const USAGE: &str = "このチャットアプリの使い方:

1. 通常のチャット: 質問や会話を入力すると応答します
2. LP企画設計: 「LP企画: 商品名やテーマ」と入力すると、そのテーマについての法人向けLPの企画設計分析とSVG図を生成します
3. ファイルアップロード: CSVファイル（ターゲット分析データ）やSVGファイル（レイアウト参考）をアップロードして、LP企画設計に活用できます

例: 「LP企画: クラウドセキュリティサービス」（オプションでファイルをアップロード）";

const HOW_ARE_YOU: &str = "元気です！あなたはどうですか？";

const FAREWELL: &str = "さようなら！またお話しましょう。";

const FILE_HINT: &str = "CSVファイルは法人企業のアンケートデータなどを分析に活用できます。SVGファイルはレイアウトの参考として活用できます。ファイルアップロード欄からアップロードしてください。";

const FALLBACK: &str = "なるほど、もっと教えてください。LP企画設計をご希望の場合は、「LP企画: 商品名やテーマ」のように入力してください。";

/// Pick the canned reply for an ordinary message. Rules are checked in order.
pub fn canned_reply(message: &str) -> &'static str {
    let lower = message.to_lowercase();

    if message.contains("こんにちは") || lower.contains("hello") {
        GREETING
    } else if message.contains("LP企画") || lower.contains("lp") {
        LP_HINT
    } else if message.contains("使い方") {
        USAGE
    } else if message.contains("元気") {
        HOW_ARE_YOU
    } else if message.contains("さようなら")
        || lower.contains("goodbye")
        || message.contains("バイバイ")
    {
        FAREWELL
    } else if lower.contains("csv") || message.contains("ファイル") {
        FILE_HINT
    } else {
        FALLBACK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting() {
        assert_eq!(canned_reply("こんにちは"), GREETING);
        assert_eq!(canned_reply("Hello there"), GREETING);
    }

    #[test]
    fn test_lp_hint_without_colon() {
        assert_eq!(canned_reply("LP企画をやりたい"), LP_HINT);
        assert_eq!(canned_reply("What is an LP?"), LP_HINT);
    }

    #[test]
    fn test_rule_order() {
        // Greeting wins over the file hint.
        assert_eq!(canned_reply("こんにちは、CSVについて"), GREETING);
        assert_eq!(canned_reply("CSVファイルは使える？"), FILE_HINT);
    }

    #[test]
    fn test_usage_and_farewell() {
        assert!(canned_reply("使い方を教えて").contains("LP企画設計"));
        assert_eq!(canned_reply("バイバイ"), FAREWELL);
        assert_eq!(canned_reply("goodbye"), FAREWELL);
        assert_eq!(canned_reply("元気？"), HOW_ARE_YOU);
    }

    #[test]
    fn test_fallback() {
        assert_eq!(canned_reply("今日は雨ですね"), FALLBACK);
    }
}

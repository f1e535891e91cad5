//! リソースを変更するコマンド共通のライフサイクル

use async_trait::async_trait;
use colored::Colorize;

/// フラグを検証し、不足分を補ってから実行するコマンド
#[async_trait]
pub trait ActionCommand: Send + Sync {
    /// バックエンドに触れる前に、決して通らないフラグ値を弾く
    async fn validate(&self) -> anyhow::Result<()>;

    /// 省略された値を設定とバックエンドから補う
    ///
    /// プロンプトは出さない。導出できない値はエラー
    async fn ask(&mut self) -> anyhow::Result<()>;

    async fn execute(&mut self) -> anyhow::Result<()>;

    /// 成功後に提案する次のコマンド
    fn recommended_actions(&self) -> Vec<String> {
        Vec::new()
    }
}

pub async fn run_action(cmd: &mut dyn ActionCommand) -> anyhow::Result<()> {
    cmd.validate().await?;
    cmd.ask().await?;
    cmd.execute().await?;

    let actions = cmd.recommended_actions();
    if !actions.is_empty() {
        println!();
        println!("{}", "Recommended follow-up:".bold());
        for action in actions {
            println!("  • {}", action.cyan());
        }
    }
    Ok(())
}

/// アプリケーション・環境・サービス・パイプラインの名前
///
/// 英小文字・数字・ハイフンのみ。先頭は英字
pub fn validate_name(kind: &str, name: &str) -> anyhow::Result<()> {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !starts_with_letter || !rest_ok || name.ends_with('-') || name.len() > 63 {
        anyhow::bail!(
            "Invalid {} name '{}'\n\nHint:\n  • Use lowercase letters, digits and hyphens, starting with a letter",
            kind,
            name
        );
    }
    Ok(())
}

/// 破壊的なコマンドは `--yes` 付きでのみ実行
pub fn require_confirmation(yes: bool, what: &str) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!(
            "Refusing to delete {} without confirmation\n\nHint:\n  • Re-run with --yes",
            what
        );
    }
    Ok(())
}

/// 繰り返し指定された `KEY=VALUE` をパース
pub fn parse_variables(
    pairs: &[String],
) -> anyhow::Result<std::collections::BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => anyhow::bail!("Expected KEY=VALUE, got '{}'", pair),
        })
        .collect()
}

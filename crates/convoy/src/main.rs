mod action;
mod commands;
mod context;
mod progress;
mod utils;

use clap::{Args, Parser, Subcommand};
use context::GlobalArgs;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(about = "Ship containerized applications to the cloud", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// アプリケーションを管理
    #[command(subcommand)]
    App(AppCommands),
    /// アプリケーションの環境を管理
    #[command(subcommand)]
    Env(EnvCommands),
    /// サービスのデプロイと削除
    #[command(subcommand)]
    Svc(SvcCommands),
    /// 継続的デリバリーのパイプラインを管理
    #[command(subcommand)]
    Pipeline(PipelineCommands),
    /// ワンオフタスクを実行
    #[command(subcommand)]
    Task(TaskCommands),
    /// タスクグループのログを表示
    Logs(LogsArgs),
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
enum AppCommands {
    /// アプリケーションと共有リソースを作成
    Init {
        /// アプリケーション名
        #[arg(short, long)]
        name: String,
        /// サービスを公開するドメイン
        #[arg(long)]
        domain: Option<String>,
    },
    /// アプリケーションを環境・サービスごと削除
    Delete {
        /// アプリケーション名（省略時はワークスペース内の唯一のアプリケーション）
        #[arg(short, long)]
        name: Option<String>,
        /// 確認を省略する
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum EnvCommands {
    /// 環境を作成
    Init {
        /// 環境名 (test, staging, prod, ...)
        #[arg(short, long)]
        name: String,
        /// アプリケーション名
        #[arg(short, long)]
        app: Option<String>,
        /// デプロイ先アカウント（省略時は呼び出し元のアカウント）
        #[arg(long)]
        account: Option<String>,
        /// 本番環境として扱う
        #[arg(long)]
        prod: bool,
        /// VPCを新規作成せず既存のVPCにデプロイ
        #[arg(long, requires = "import_subnets")]
        import_vpc: Option<String>,
        /// サービスとタスクが使う既存VPCのサブネット
        #[arg(long, value_delimiter = ',', requires = "import_vpc")]
        import_subnets: Vec<String>,
    },
    /// 環境を削除
    Delete {
        /// 環境名
        #[arg(short, long)]
        name: String,
        /// アプリケーション名
        #[arg(short, long)]
        app: Option<String>,
        /// 削除前に環境のバケットを空にする
        #[arg(long)]
        empty_buckets: bool,
        /// 確認を省略する
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SvcCommands {
    /// サービスを環境にデプロイ
    Deploy(SvcDeployArgs),
    /// サービスを削除
    Delete {
        /// サービス名
        #[arg(short, long)]
        name: String,
        /// アプリケーション名
        #[arg(short, long)]
        app: Option<String>,
        /// この環境からのみ削除
        #[arg(short, long)]
        env: Option<String>,
        /// 確認を省略する
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
struct SvcDeployArgs {
    /// サービス名
    #[arg(short, long)]
    name: String,
    /// デプロイ先の環境
    #[arg(short, long)]
    env: String,
    /// アプリケーション名
    #[arg(short, long)]
    app: Option<String>,
    /// 実行するコンテナイメージ
    #[arg(short, long)]
    image: String,
    /// コンテナのポート
    #[arg(long, default_value_t = 80)]
    port: u16,
    /// CPUユニット
    #[arg(long, default_value_t = 256)]
    cpu: u32,
    /// メモリ (MiB)
    #[arg(long, default_value_t = 512)]
    memory: u32,
    /// タスク数
    #[arg(long, default_value_t = 1)]
    count: u32,
    /// 環境変数（KEY=VALUE、複数指定可）
    #[arg(long = "env-var", value_name = "KEY=VALUE")]
    variables: Vec<String>,
}

#[derive(Subcommand)]
enum PipelineCommands {
    /// パイプラインを作成または更新
    Deploy(PipelineDeployArgs),
    /// パイプラインを削除
    Delete {
        /// パイプライン名
        #[arg(short, long)]
        name: String,
        /// アプリケーション名
        #[arg(short, long)]
        app: Option<String>,
        /// 確認を省略する
        #[arg(long)]
        yes: bool,
    },
    /// パイプラインのデプロイ済みステージを表示
    Status {
        /// パイプライン名
        #[arg(short, long)]
        name: String,
        /// アプリケーション名
        #[arg(short, long)]
        app: Option<String>,
    },
}

#[derive(Args)]
struct PipelineDeployArgs {
    /// パイプライン名
    #[arg(short, long)]
    name: String,
    /// アプリケーション名
    #[arg(short, long)]
    app: Option<String>,
    /// ソースリポジトリ (owner/name)
    #[arg(long)]
    repo: String,
    /// ソースブランチ
    #[arg(long, default_value = "main")]
    branch: String,
    /// ソースプロバイダー
    #[arg(long, default_value = "GitHub")]
    provider: String,
    /// デプロイ先の環境を順に指定（複数指定可、省略時は全環境）
    #[arg(long = "stage", value_name = "ENV")]
    stages: Vec<String>,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// ワンオフタスクを実行
    Run(TaskRunArgs),
}

#[derive(Args)]
struct TaskRunArgs {
    /// タスクグループ名
    #[arg(short, long)]
    group: String,
    /// コンテナイメージ（省略時はグループのリポジトリ）
    #[arg(short, long)]
    image: Option<String>,
    /// 起動するタスク数
    #[arg(long, default_value_t = 1)]
    count: u32,
    /// CPUユニット
    #[arg(long, default_value_t = 256)]
    cpu: u32,
    /// メモリ (MiB)
    #[arg(long, default_value_t = 512)]
    memory: u32,
    /// イメージのデフォルトの代わりに実行するコマンド
    #[arg(long)]
    command: Option<String>,
    /// 環境変数（KEY=VALUE、複数指定可）
    #[arg(long = "env-var", value_name = "KEY=VALUE")]
    variables: Vec<String>,
    /// 実行するサブネット（省略時は環境のサブネット、なければリージョンのデフォルトサブネット）
    #[arg(long, value_delimiter = ',')]
    subnets: Vec<String>,
    /// 付与するセキュリティグループ（省略時は環境のセキュリティグループ）
    #[arg(long, value_delimiter = ',')]
    security_groups: Vec<String>,
    /// 隣で実行するアプリケーション
    #[arg(short, long, requires = "env")]
    app: Option<String>,
    /// タスクを実行するクラスターの環境
    #[arg(short, long)]
    env: Option<String>,
    /// タスクが停止するまでログを流す
    #[arg(short, long)]
    follow: bool,
}

#[derive(Args)]
struct LogsArgs {
    /// タスクグループ名
    #[arg(short, long)]
    group: String,
    /// 読み取るタスクID（複数指定可）
    #[arg(long = "task-id", required = true)]
    task_ids: Vec<String>,
    /// 直近N分のイベントのみ表示
    #[arg(long)]
    since: Option<u32>,
    /// 新しいイベントを流し続ける
    #[arg(short, long)]
    follow: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);
    let global = cli.global;

    match cli.command {
        Commands::App(AppCommands::Init { name, domain }) => {
            commands::app::init(&global, name, domain).await?;
        }
        Commands::App(AppCommands::Delete { name, yes }) => {
            commands::app::delete(&global, name, yes).await?;
        }
        Commands::Env(EnvCommands::Init {
            name,
            app,
            account,
            prod,
            import_vpc,
            import_subnets,
        }) => {
            commands::env::init(
                &global,
                commands::env::InitOptions {
                    name,
                    app,
                    account,
                    prod,
                    import_vpc,
                    import_subnets,
                },
            )
            .await?;
        }
        Commands::Env(EnvCommands::Delete {
            name,
            app,
            empty_buckets,
            yes,
        }) => {
            commands::env::delete(&global, name, app, empty_buckets, yes).await?;
        }
        Commands::Svc(SvcCommands::Deploy(args)) => {
            commands::svc::deploy(
                &global,
                commands::svc::DeployOptions {
                    name: args.name,
                    env: args.env,
                    app: args.app,
                    image: args.image,
                    port: args.port,
                    cpu: args.cpu,
                    memory: args.memory,
                    count: args.count,
                    variables: args.variables,
                },
            )
            .await?;
        }
        Commands::Svc(SvcCommands::Delete {
            name,
            app,
            env,
            yes,
        }) => {
            commands::svc::delete(&global, name, app, env, yes).await?;
        }
        Commands::Pipeline(PipelineCommands::Deploy(args)) => {
            commands::pipeline::deploy(
                &global,
                commands::pipeline::DeployOptions {
                    name: args.name,
                    app: args.app,
                    repository: args.repo,
                    branch: args.branch,
                    provider: args.provider,
                    stages: args.stages,
                },
            )
            .await?;
        }
        Commands::Pipeline(PipelineCommands::Delete { name, app, yes }) => {
            commands::pipeline::delete(&global, name, app, yes).await?;
        }
        Commands::Pipeline(PipelineCommands::Status { name, app }) => {
            commands::pipeline::status(&global, name, app).await?;
        }
        Commands::Task(TaskCommands::Run(args)) => {
            commands::task::run(
                &global,
                commands::task::RunOptions {
                    group: args.group,
                    image: args.image,
                    count: args.count,
                    cpu: args.cpu,
                    memory: args.memory,
                    command: args.command,
                    variables: args.variables,
                    subnets: args.subnets,
                    security_groups: args.security_groups,
                    app: args.app,
                    env: args.env,
                    follow: args.follow,
                },
            )
            .await?;
        }
        Commands::Logs(args) => {
            commands::logs::handle(&global, args.group, args.task_ids, args.since, args.follow)
                .await?;
        }
        Commands::Version => {
            println!("convoy {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

/// 診断出力はstderrへ。`-v` でデフォルトレベルをdebugに上げる
fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();
}

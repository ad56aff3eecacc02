use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use wealthwise::client::Advisor;
use wealthwise::config::Config;
use wealthwise::error::{Result, WealthWiseError};
use wealthwise::services::entitlement::Feature;

#[derive(Parser, Debug)]
#[command(name = "wealthwise")]
#[command(about = "WealthWise advisory pipeline CLI")]
struct Cli {
    #[arg(long, env = "WEALTHWISE_CONFIG", default_value = "./wealthwise.json")]
    config: String,

    #[arg(long, default_value_t = 1)]
    user_id: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one message, optionally continuing a conversation.
    Chat {
        message: String,
        #[arg(long)]
        conversation: Option<i32>,
    },
    /// List conversations, or show one with --id.
    Conversations {
        #[arg(long)]
        id: Option<i32>,
        #[arg(long)]
        delete: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Open insights; listing marks pending ones delivered.
    Insights,
    GenerateInsights,
    Accept {
        id: i32,
    },
    Dismiss {
        id: i32,
    },
    Usage {
        #[arg(long)]
        feature: Option<String>,
    },
    Memory {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        summaries: bool,
    },
    Plan {
        title: String,
        #[arg(long, default_value = "general")]
        plan_type: String,
        #[arg(long)]
        summary: Option<String>,
    },
    Alert {
        symbol: String,
        condition: String,
        target_price: f64,
    },
    TriggerAlert {
        id: i32,
    },
    Subscription {
        status: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| WealthWiseError::Serialization(e.to_string()))?;
    println!("{text}");
    Ok(())
}

async fn run(advisor: &Advisor, user_id: i32, command: Commands) -> Result<()> {
    match command {
        Commands::Chat {
            message,
            conversation,
        } => {
            let reply = advisor.send_message(user_id, conversation, &message).await?;
            println!("[conversation {}]", reply.conversation_id);
            println!("{}", reply.message.content);
            // follow-ups are stored on the reply by a background handler
            advisor.wait_idle().await;
            let (_, messages) = advisor.get_messages(user_id, reply.conversation_id).await?;
            let follow_ups = messages
                .into_iter()
                .find(|m| m.id == reply.message.id)
                .and_then(|m| m.follow_ups);
            if let Some(follow_ups) = follow_ups {
                println!();
                for item in follow_ups {
                    println!("  > {item}");
                }
            }
        }
        Commands::Conversations { id, delete, limit } => match id {
            Some(id) if delete => {
                advisor.delete_conversation(user_id, id).await?;
                println!("Conversation {id} deleted.");
            }
            Some(id) => {
                let (conversation, messages) = advisor.get_messages(user_id, id).await?;
                println!("# {}", conversation.title);
                for message in messages {
                    println!("\n{}: {}", message.role, message.content);
                }
            }
            None => {
                for conversation in advisor.list_conversations(user_id, limit).await? {
                    println!("{:>5}  {}", conversation.id, conversation.title);
                }
            }
        },
        Commands::Insights => print_json(&advisor.pending_insights(user_id).await?)?,
        Commands::GenerateInsights => print_json(&advisor.generate_insights(user_id).await?)?,
        Commands::Accept { id } => print_json(&advisor.accept_insight(user_id, id).await?)?,
        Commands::Dismiss { id } => print_json(&advisor.dismiss_insight(user_id, id).await?)?,
        Commands::Usage { feature } => match feature {
            Some(feature) => {
                let feature = Feature::parse(&feature)?;
                print_json(&advisor.check_entitlement(user_id, feature).await?)?
            }
            None => print_json(&advisor.usage_summary(user_id).await?)?,
        },
        Commands::Memory { limit, summaries } => {
            if summaries {
                print_json(&advisor.conversation_summaries(user_id, limit).await?)?
            } else {
                print_json(&advisor.memory_facts(user_id, limit).await?)?
            }
        }
        Commands::Plan {
            title,
            plan_type,
            summary,
        } => print_json(
            &advisor
                .create_plan(user_id, &title, &plan_type, summary.as_deref())
                .await?,
        )?,
        Commands::Alert {
            symbol,
            condition,
            target_price,
        } => print_json(
            &advisor
                .create_alert(user_id, &symbol, &condition, target_price)
                .await?,
        )?,
        Commands::TriggerAlert { id } => print_json(&advisor.trigger_alert(user_id, id).await?)?,
        Commands::Subscription { status } => {
            advisor.set_subscription_status(user_id, &status).await?;
            println!("Subscription status set to '{status}'.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wealthwise=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;
    let advisor = Advisor::from_config(config).await?;

    let outcome = run(&advisor, cli.user_id, cli.command).await;
    // background insight and memory work finishes before the process exits
    advisor.wait_idle().await;
    outcome
}

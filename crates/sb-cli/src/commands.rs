//! Command dispatch onto the core services.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, Local};
use sb_core::domain::{
    forwarding_topology_properties, time_passed_body, uno_properties, EntityKind, EntityPath,
    EntitySettings, Properties, PropertyValue, QueueRef, SubscriptionRef, TopicRef,
};
use sb_core::{NamespaceClient, WorkerSpec};
use tracing::warn;

use crate::cli::{Command, MessageArgs, QueueCommand, TopicCommand};
use crate::display::{print_listing, print_summary, ConsoleObserver};

pub async fn run(client: &NamespaceClient, command: Command) -> Result<()> {
    match command {
        Command::Topic(command) => topic(client, command).await,
        Command::Queue(command) => queue(client, command).await,
    }
}

fn settings(client: &NamespaceClient) -> EntitySettings {
    EntitySettings {
        max_delivery_count: client.config().max_delivery_count,
        ..EntitySettings::default()
    }
}

async fn topic(client: &NamespaceClient, command: TopicCommand) -> Result<()> {
    match command {
        TopicCommand::List => {
            let rows = client.entities().await?.list_topics().await?;
            print_listing("Topics", &rows);
        }
        TopicCommand::Create { name } => {
            client
                .entities()
                .await?
                .create_topic(&TopicRef::new(&name).with_settings(settings(client)))
                .await
                .with_context(|| format!("creating topic {name}"))?;
            println!("Topic {name} created");
        }
        TopicCommand::Delete { name } => {
            client
                .entities()
                .await?
                .delete_topic(&name)
                .await
                .with_context(|| format!("deleting topic {name}"))?;
            println!("Topic {name} deleted");
        }
        TopicCommand::ListSubscriptions { name } => {
            let entities = client.entities().await?;
            entities.require(EntityKind::Topic, &name).await?;
            let rows = client.subscriptions().await?.list(&name).await?;
            print_listing(&format!("Subscriptions on {name}"), &rows);
        }
        TopicCommand::CreateSubscription {
            name,
            subscription,
            forward_to,
            forward_dead_letter_to,
            rules,
        } => {
            let mut request =
                SubscriptionRef::new(&name, &subscription).with_settings(settings(client));
            if let Some(directive) = forward_to {
                request = request.forward_to(directive);
            }
            if let Some(directive) = forward_dead_letter_to {
                request = request.forward_dead_letter_to(directive);
            }
            for directive in &rules {
                if !request.rules.apply_directive(directive) {
                    warn!(directive = %directive, "Ignoring rule, expected name:filter[:action]");
                }
            }
            client
                .subscriptions()
                .await?
                .create(&request)
                .await
                .with_context(|| format!("creating subscription {subscription} on {name}"))?;
            println!(
                "Subscription {subscription} created on topic {name} with {} rule(s)",
                request.rules.len()
            );
        }
        TopicCommand::DeleteSubscription { name, subscription } => {
            client
                .subscriptions()
                .await?
                .delete(&name, &subscription)
                .await
                .with_context(|| format!("deleting subscription {subscription} on {name}"))?;
            println!("Subscription {subscription} deleted from topic {name}");
        }
        TopicCommand::Send { topic, message } => {
            send(client, EntityPath::topic(&topic), &topic, message).await?;
        }
        TopicCommand::Subscribe {
            topics,
            subscription,
            wiretap: _,
            peek,
        } => {
            // Without --subscription the parser guarantees --wiretap.
            let specs = topics
                .into_iter()
                .map(|topic| match &subscription {
                    Some(name) => WorkerSpec::subscription(topic, name.clone()),
                    None => WorkerSpec::tap(topic),
                })
                .map(|spec| spec.peek(peek))
                .collect();
            listen(client, specs).await?;
        }
    }
    Ok(())
}

async fn queue(client: &NamespaceClient, command: QueueCommand) -> Result<()> {
    match command {
        QueueCommand::List => {
            let rows = client.entities().await?.list_queues().await?;
            print_listing("Queues", &rows);
        }
        QueueCommand::Create {
            name,
            forward_to,
            forward_dead_letter_to,
        } => {
            let mut request = QueueRef::new(&name).with_settings(settings(client));
            if let Some(directive) = forward_to {
                request = request.forward_to(directive);
            }
            if let Some(directive) = forward_dead_letter_to {
                request = request.forward_dead_letter_to(directive);
            }
            client
                .entities()
                .await?
                .create_queue(&request)
                .await
                .with_context(|| format!("creating queue {name}"))?;
            println!("Queue {name} created");
        }
        QueueCommand::Delete { name } => {
            client
                .entities()
                .await?
                .delete_queue(&name)
                .await
                .with_context(|| format!("deleting queue {name}"))?;
            println!("Queue {name} deleted");
        }
        QueueCommand::Send { queue, message } => {
            send(client, EntityPath::queue(&queue), &queue, message).await?;
        }
        QueueCommand::Subscribe { queues, peek } => {
            let specs = queues
                .into_iter()
                .map(|queue| WorkerSpec::queue(queue).peek(peek))
                .collect();
            listen(client, specs).await?;
        }
    }
    Ok(())
}

async fn send(
    client: &NamespaceClient,
    target: EntityPath,
    entity: &str,
    args: MessageArgs,
) -> Result<()> {
    let now: DateTime<FixedOffset> = Local::now().into();
    let message = build_message(entity, &args, now)?;
    let sent = client
        .sender()
        .await?
        .send(
            &target,
            &message.body,
            message.label.as_deref(),
            message.properties,
        )
        .await
        .with_context(|| format!("sending to {target}"))?;
    println!("Sent message {} to {target}", sent.message_id);
    println!("{}", sent.body);
    Ok(())
}

struct Draft {
    body: serde_json::Value,
    label: Option<String>,
    properties: Properties,
}

fn build_message(entity: &str, args: &MessageArgs, now: DateTime<FixedOffset>) -> Result<Draft> {
    let body = match (&args.body, args.default) {
        (_, true) => time_passed_body(now),
        (Some(raw), false) => serde_json::from_str(raw).context("--body must be valid JSON")?,
        (None, false) => bail!("either --body or --default is required"),
    };

    let mut label = None;
    let mut properties = Properties::new();
    if let Some(name) = &args.name {
        properties.extend(forwarding_topology_properties(
            &args.sender,
            name,
            &args.domain,
            &args.tenant,
            &args.message_version,
        ));
        label = Some(format!("{}.{name}", args.domain));
    }
    if args.uno {
        properties.extend(uno_properties(&args.tenant));
        label = Some(entity.to_string());
    }
    for raw in &args.properties {
        let (key, value) = parse_property(raw)?;
        properties.insert(key, value);
    }
    if let Some(explicit) = &args.label {
        label = Some(explicit.clone());
    }

    Ok(Draft {
        body,
        label,
        properties,
    })
}

/// `key=value`; the value is read as JSON when it parses, else as text.
fn parse_property(raw: &str) -> Result<(String, PropertyValue)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("property `{raw}` must be key=value");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("property `{raw}` has an empty key");
    }
    let value = value.trim();
    let parsed = serde_json::from_str::<PropertyValue>(value)
        .unwrap_or_else(|_| PropertyValue::String(value.to_string()));
    Ok((key.to_string(), parsed))
}

async fn listen(client: &NamespaceClient, specs: Vec<WorkerSpec>) -> Result<()> {
    let coordinator = client.coordinator().await?;
    println!(
        "Listening on {} target(s), press Ctrl+C to stop",
        specs.len()
    );
    let summary = coordinator
        .run_until_interrupt(specs, Arc::new(ConsoleObserver))
        .await;
    print_summary(&summary);
    if !summary.is_clean() {
        bail!("one or more listeners did not shut down cleanly");
    }
    Ok(())
}

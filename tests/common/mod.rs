//! In-memory stand-in for the cloud gateway, shared by the scenario tests.
//!
//! Every mutation appends to an ordered event log so tests can assert on
//! operation ordering as well as final state.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use fleetctl::cloud::{
    AsgApi, AsgDetail, AsgInstance, BatchOutcome, CommandApi, CommandStatus, ComputeApi,
    ComputeInstance, InstanceProtection, ListenerRule, LoadBalancerApi, ParamStoreApi,
    RefreshState, RoutingTableApi,
};
use fleetctl::error::{CloudError, CloudErrorKind};
use fleetctl::routing::RoutingEntry;
use fleetctl::types::TargetHealth;

pub const LISTENER_ARN: &str = "arn:aws:elasticloadbalancing:us-east-1:1:listener/app/ce/x/y";

#[derive(Debug, Clone, Default)]
pub struct FakeAsg {
    pub desired: u32,
    pub min: u32,
    pub max: u32,
    pub instances: Vec<FakeMember>,
}

#[derive(Debug, Clone)]
pub struct FakeMember {
    pub id: String,
    pub lifecycle: String,
    pub protected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeEc2 {
    pub ip: Option<String>,
    pub tags: HashMap<String, String>,
    pub stop_protected: bool,
    pub terminate_protected: bool,
    pub terminated: bool,
}

#[derive(Debug, Clone)]
pub struct FakeRule {
    pub arn: String,
    pub priority: String,
    pub patterns: Vec<String>,
    pub target_group_arn: Option<String>,
}

#[derive(Default)]
pub struct FakeCloud {
    pub asgs: Mutex<HashMap<String, FakeAsg>>,
    pub ec2: Mutex<HashMap<String, FakeEc2>>,
    /// Target group name -> healthy state per instance id
    pub targets: Mutex<HashMap<String, HashMap<String, TargetHealth>>>,
    pub rules: Mutex<Vec<FakeRule>>,
    pub params: Mutex<HashMap<String, String>>,
    pub table: Mutex<HashMap<String, RoutingEntry>>,
    pub batch_sizes: Mutex<Vec<usize>>,
    pub log: Mutex<Vec<String>>,
    /// Instances launched by a scale-up become healthy immediately
    pub auto_heal: AtomicBool,
    pub fail_rule_forward: AtomicBool,
    pub fail_batch_keys: Mutex<Vec<String>>,
    launch_counter: AtomicU32,
}

pub fn tg_arn(name: &str) -> String {
    format!("arn:aws:elasticloadbalancing:us-east-1:1:targetgroup/{name}/abc")
}

impl FakeCloud {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.auto_heal.store(true, Ordering::SeqCst);
        fake
    }

    fn record(&self, event: String) {
        self.log.lock().unwrap().push(event);
    }

    pub fn log_index(&self, needle: &str) -> Option<usize> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .position(|e| e.contains(needle))
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.params.lock().unwrap().get(key).cloned()
    }

    pub fn set_param(&self, key: &str, value: &str) {
        self.params
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn asg_desired(&self, name: &str) -> u32 {
        self.asgs.lock().unwrap().get(name).map(|a| a.desired).unwrap_or(0)
    }

    pub fn rule_target(&self, arn: &str) -> Option<String> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.arn == arn)
            .and_then(|r| r.target_group_arn.clone())
    }

    pub fn rule_patterns(&self, arn: &str) -> Vec<String> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.arn == arn)
            .map(|r| r.patterns.clone())
            .unwrap_or_default()
    }

    /// Seed one blue/green environment: a serving fleet on `active_color`
    /// and an empty standby side, with the forwarding rule and parameter
    /// store entries in agreement.
    pub fn seed_environment(
        &self,
        env: fleetctl::Environment,
        active_color: fleetctl::Color,
        capacity: u32,
        version: &str,
    ) {
        use fleetctl::Color;

        for color in [Color::Blue, Color::Green] {
            let asg_name = env.asg_name(color);
            self.targets
                .lock()
                .unwrap()
                .entry(asg_name.clone())
                .or_default();
            self.asgs.lock().unwrap().insert(
                asg_name,
                FakeAsg {
                    desired: 0,
                    min: 0,
                    max: 8,
                    instances: Vec::new(),
                },
            );
        }

        self.launch(env, active_color, capacity);

        self.rules.lock().unwrap().push(FakeRule {
            arn: format!("arn:rule/{}", env.name()),
            priority: "10".to_string(),
            patterns: vec![format!("/{}*", env.name())],
            target_group_arn: Some(tg_arn(&env.target_group_name(active_color))),
        });

        self.set_param(&env.active_color_key(), active_color.as_str());
        self.set_param(&env.version_key(active_color), version);
    }

    /// Add a router target group and its primary listener rule
    pub fn seed_router(&self, env: fleetctl::Environment) {
        let tg_name = env.router_target_group_name();
        self.targets
            .lock()
            .unwrap()
            .entry(tg_name.clone())
            .or_default();
        self.rules.lock().unwrap().push(FakeRule {
            arn: format!("arn:rule/{}-router", env.name()),
            priority: "5".to_string(),
            patterns: env.router_path_patterns(),
            target_group_arn: Some(tg_arn(&tg_name)),
        });
    }

    /// Launch healthy, in-service, color-tagged instances into an ASG
    pub fn launch(&self, env: fleetctl::Environment, color: fleetctl::Color, count: u32) {
        let asg_name = env.asg_name(color);
        for _ in 0..count {
            let n = self.launch_counter.fetch_add(1, Ordering::SeqCst);
            let id = format!("i-{:08x}", 0xce000000u32 + n);
            self.asgs
                .lock()
                .unwrap()
                .entry(asg_name.clone())
                .or_default()
                .instances
                .push(FakeMember {
                    id: id.clone(),
                    lifecycle: "InService".to_string(),
                    protected: false,
                });
            self.ec2.lock().unwrap().insert(
                id.clone(),
                FakeEc2 {
                    ip: Some(format!("10.0.0.{}", n + 1)),
                    tags: HashMap::from([("Color".to_string(), color.as_str().to_string())]),
                    ..Default::default()
                },
            );
            self.targets
                .lock()
                .unwrap()
                .entry(asg_name.clone())
                .or_default()
                .insert(id, TargetHealth::Healthy);
        }
        let mut asgs = self.asgs.lock().unwrap();
        if let Some(asg) = asgs.get_mut(&asg_name) {
            asg.desired = asg.instances.len() as u32;
        }
    }

    fn not_found(op: &'static str, what: &str) -> CloudError {
        CloudError::new(CloudErrorKind::NotFound, op, what.to_string())
    }
}

#[async_trait]
impl AsgApi for FakeCloud {
    async fn describe(&self, name: &str) -> Result<AsgDetail, CloudError> {
        let asgs = self.asgs.lock().unwrap();
        let asg = asgs
            .get(name)
            .ok_or_else(|| Self::not_found("asg.describe", name))?;
        Ok(AsgDetail {
            name: name.to_string(),
            desired_capacity: asg.desired,
            min_size: asg.min,
            max_size: asg.max,
            instances: asg
                .instances
                .iter()
                .map(|m| AsgInstance {
                    instance_id: m.id.clone(),
                    lifecycle_state: m.lifecycle.clone(),
                    protected_from_scale_in: m.protected,
                })
                .collect(),
        })
    }

    async fn set_desired_capacity(&self, name: &str, desired: u32) -> Result<(), CloudError> {
        self.record(format!("asg.set_desired {name} {desired}"));
        {
            let mut asgs = self.asgs.lock().unwrap();
            let asg = asgs
                .get_mut(name)
                .ok_or_else(|| Self::not_found("asg.set_desired_capacity", name))?;
            asg.desired = desired;

            if (desired as usize) < asg.instances.len() {
                let removed: Vec<FakeMember> =
                    asg.instances.drain(desired as usize..).collect();
                drop(asgs);
                let mut targets = self.targets.lock().unwrap();
                if let Some(tg) = targets.get_mut(name) {
                    for member in &removed {
                        tg.remove(&member.id);
                    }
                }
                return Ok(());
            }
        }

        if self.auto_heal.load(Ordering::SeqCst) {
            let current = self.asgs.lock().unwrap()[name].instances.len() as u32;
            if desired > current {
                // ASG names follow "{env}-{color}"
                let (env_name, color_name) = name.rsplit_once('-').unwrap();
                let env = fleetctl::Environment::by_name(env_name).unwrap();
                let color = fleetctl::Color::parse(color_name).unwrap();
                self.launch(env, color, desired - current);
            }
        }
        Ok(())
    }

    async fn set_min_size(&self, name: &str, min: u32) -> Result<(), CloudError> {
        self.record(format!("asg.set_min_size {name} {min}"));
        let mut asgs = self.asgs.lock().unwrap();
        let asg = asgs
            .get_mut(name)
            .ok_or_else(|| Self::not_found("asg.set_min_size", name))?;
        asg.min = min;
        Ok(())
    }

    async fn enter_standby(&self, name: &str, instance_id: &str) -> Result<(), CloudError> {
        self.record(format!("asg.enter_standby {name} {instance_id}"));
        let mut asgs = self.asgs.lock().unwrap();
        let asg = asgs
            .get_mut(name)
            .ok_or_else(|| Self::not_found("asg.enter_standby", name))?;
        let member = asg
            .instances
            .iter_mut()
            .find(|m| m.id == instance_id)
            .ok_or_else(|| Self::not_found("asg.enter_standby", instance_id))?;
        member.lifecycle = "Standby".to_string();
        asg.desired = asg.desired.saturating_sub(1);
        Ok(())
    }

    async fn exit_standby(&self, name: &str, instance_id: &str) -> Result<(), CloudError> {
        self.record(format!("asg.exit_standby {name} {instance_id}"));
        let mut asgs = self.asgs.lock().unwrap();
        let asg = asgs
            .get_mut(name)
            .ok_or_else(|| Self::not_found("asg.exit_standby", name))?;
        let member = asg
            .instances
            .iter_mut()
            .find(|m| m.id == instance_id)
            .ok_or_else(|| Self::not_found("asg.exit_standby", instance_id))?;
        member.lifecycle = "InService".to_string();
        asg.desired += 1;
        Ok(())
    }

    async fn set_scale_in_protection(
        &self,
        name: &str,
        instance_ids: &[String],
        protected: bool,
    ) -> Result<(), CloudError> {
        self.record(format!(
            "asg.set_scale_in_protection {name} {instance_ids:?} {protected}"
        ));
        let mut asgs = self.asgs.lock().unwrap();
        if let Some(asg) = asgs.get_mut(name) {
            for member in asg.instances.iter_mut() {
                if instance_ids.contains(&member.id) {
                    member.protected = protected;
                }
            }
        }
        Ok(())
    }

    async fn start_refresh(
        &self,
        name: &str,
        min_healthy_percent: u32,
    ) -> Result<String, CloudError> {
        self.record(format!("asg.start_refresh {name} {min_healthy_percent}"));
        Ok("refresh-1".to_string())
    }

    async fn refresh_status(
        &self,
        _name: &str,
        _refresh_id: &str,
    ) -> Result<RefreshState, CloudError> {
        Ok(RefreshState::Successful)
    }
}

#[async_trait]
impl ComputeApi for FakeCloud {
    async fn describe_instances(&self, ids: &[String]) -> Result<Vec<ComputeInstance>, CloudError> {
        let ec2 = self.ec2.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                ec2.get(id).map(|i| ComputeInstance {
                    instance_id: id.clone(),
                    private_ip: i.ip.clone(),
                    tags: i.tags.clone(),
                    state: if i.terminated { "terminated" } else { "running" }.to_string(),
                })
            })
            .collect())
    }

    async fn protection(&self, id: &str) -> Result<InstanceProtection, CloudError> {
        let ec2 = self.ec2.lock().unwrap();
        let instance = ec2
            .get(id)
            .ok_or_else(|| Self::not_found("ec2.describe_instance_attribute", id))?;
        Ok(InstanceProtection {
            stop_protected: instance.stop_protected,
            termination_protected: instance.terminate_protected,
        })
    }

    async fn set_stop_protection(&self, id: &str, protected: bool) -> Result<(), CloudError> {
        self.record(format!("ec2.set_stop_protection {id} {protected}"));
        let mut ec2 = self.ec2.lock().unwrap();
        let instance = ec2
            .get_mut(id)
            .ok_or_else(|| Self::not_found("ec2.set_stop_protection", id))?;
        instance.stop_protected = protected;
        Ok(())
    }

    async fn set_termination_protection(
        &self,
        id: &str,
        protected: bool,
    ) -> Result<(), CloudError> {
        self.record(format!("ec2.set_termination_protection {id} {protected}"));
        let mut ec2 = self.ec2.lock().unwrap();
        let instance = ec2
            .get_mut(id)
            .ok_or_else(|| Self::not_found("ec2.set_termination_protection", id))?;
        instance.terminate_protected = protected;
        Ok(())
    }

    async fn terminate(&self, id: &str) -> Result<(), CloudError> {
        self.record(format!("ec2.terminate {id}"));
        let mut ec2 = self.ec2.lock().unwrap();
        let instance = ec2
            .get_mut(id)
            .ok_or_else(|| Self::not_found("ec2.terminate", id))?;
        instance.terminated = true;
        drop(ec2);

        let mut asgs = self.asgs.lock().unwrap();
        for asg in asgs.values_mut() {
            asg.instances.retain(|m| m.id != id);
        }
        Ok(())
    }

    async fn tag_instance(&self, id: &str, key: &str, value: &str) -> Result<(), CloudError> {
        self.record(format!("ec2.tag {id} {key}={value}"));
        let mut ec2 = self.ec2.lock().unwrap();
        let instance = ec2
            .get_mut(id)
            .ok_or_else(|| Self::not_found("ec2.create_tags", id))?;
        instance.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl LoadBalancerApi for FakeCloud {
    async fn target_group_arn(&self, name: &str) -> Result<String, CloudError> {
        let targets = self.targets.lock().unwrap();
        if targets.contains_key(name) {
            Ok(tg_arn(name))
        } else {
            Err(Self::not_found("elb.describe_target_groups", name))
        }
    }

    async fn target_health(&self, tg: &str) -> Result<Vec<(String, TargetHealth)>, CloudError> {
        let name = tg.split('/').nth(1).unwrap_or(tg);
        let targets = self.targets.lock().unwrap();
        let group = targets
            .get(name)
            .ok_or_else(|| Self::not_found("elb.describe_target_health", tg))?;
        Ok(group.iter().map(|(id, h)| (id.clone(), *h)).collect())
    }

    async fn register(&self, tg: &str, instance_id: &str) -> Result<(), CloudError> {
        self.record(format!("elb.register {tg} {instance_id}"));
        let name = tg.split('/').nth(1).unwrap_or(tg).to_string();
        self.targets
            .lock()
            .unwrap()
            .entry(name)
            .or_default()
            .insert(instance_id.to_string(), TargetHealth::Healthy);
        Ok(())
    }

    async fn deregister(&self, tg: &str, instance_id: &str) -> Result<(), CloudError> {
        self.record(format!("elb.deregister {tg} {instance_id}"));
        let name = tg.split('/').nth(1).unwrap_or(tg);
        if let Some(group) = self.targets.lock().unwrap().get_mut(name) {
            group.remove(instance_id);
        }
        Ok(())
    }

    async fn describe_rules(&self, _listener_arn: &str) -> Result<Vec<ListenerRule>, CloudError> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .map(|r| ListenerRule {
                rule_arn: r.arn.clone(),
                priority: r.priority.clone(),
                is_default: false,
                path_patterns: r.patterns.clone(),
                target_group_arn: r.target_group_arn.clone(),
            })
            .collect())
    }

    async fn set_rule_forward(&self, rule_arn: &str, tg: &str) -> Result<(), CloudError> {
        if self.fail_rule_forward.load(Ordering::SeqCst) {
            return Err(CloudError::new(
                CloudErrorKind::Unknown,
                "elb.modify_rule_forward",
                "injected failure",
            ));
        }
        self.record(format!("elb.set_rule_forward {rule_arn} {tg}"));
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .find(|r| r.arn == rule_arn)
            .ok_or_else(|| Self::not_found("elb.modify_rule", rule_arn))?;
        rule.target_group_arn = Some(tg.to_string());
        Ok(())
    }

    async fn set_rule_patterns(
        &self,
        rule_arn: &str,
        patterns: &[String],
    ) -> Result<(), CloudError> {
        self.record(format!("elb.set_rule_patterns {rule_arn} {patterns:?}"));
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .find(|r| r.arn == rule_arn)
            .ok_or_else(|| Self::not_found("elb.modify_rule", rule_arn))?;
        rule.patterns = patterns.to_vec();
        Ok(())
    }
}

#[async_trait]
impl ParamStoreApi for FakeCloud {
    async fn get(&self, name: &str) -> Result<Option<String>, CloudError> {
        Ok(self.params.lock().unwrap().get(name).cloned())
    }

    async fn put(&self, name: &str, value: &str, _secure: bool) -> Result<(), CloudError> {
        self.record(format!("ssm.put {name}={value}"));
        self.params
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), CloudError> {
        self.record(format!("ssm.delete {name}"));
        self.params.lock().unwrap().remove(name);
        Ok(())
    }
}

#[async_trait]
impl CommandApi for FakeCloud {
    async fn run_command(
        &self,
        instance_id: &str,
        document: &str,
        _commands: &[String],
    ) -> Result<String, CloudError> {
        self.record(format!("ssm.run_command {instance_id} {document}"));
        Ok(format!("cmd-{instance_id}"))
    }

    async fn command_status(
        &self,
        _command_id: &str,
        _instance_id: &str,
    ) -> Result<CommandStatus, CloudError> {
        Ok(CommandStatus::Success)
    }
}

#[async_trait]
impl RoutingTableApi for FakeCloud {
    async fn get(&self, _table: &str, key: &str) -> Result<Option<RoutingEntry>, CloudError> {
        Ok(self.table.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, _table: &str, entry: &RoutingEntry) -> Result<(), CloudError> {
        self.record(format!("dynamo.put {}", entry.compiler_id));
        self.table
            .lock()
            .unwrap()
            .insert(entry.compiler_id.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, _table: &str, key: &str) -> Result<(), CloudError> {
        self.record(format!("dynamo.delete {key}"));
        self.table.lock().unwrap().remove(key);
        Ok(())
    }

    async fn scan_environment(
        &self,
        _table: &str,
        environment: &str,
    ) -> Result<Vec<RoutingEntry>, CloudError> {
        Ok(self
            .table
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.environment == environment)
            .cloned()
            .collect())
    }

    async fn batch_write(
        &self,
        _table: &str,
        puts: &[RoutingEntry],
        delete_keys: &[String],
    ) -> Result<BatchOutcome, CloudError> {
        self.batch_sizes
            .lock()
            .unwrap()
            .push(puts.len() + delete_keys.len());
        let injected = self.fail_batch_keys.lock().unwrap().clone();
        let mut failed = Vec::new();
        let mut table = self.table.lock().unwrap();
        for entry in puts {
            if injected.contains(&entry.compiler_id) {
                failed.push(entry.compiler_id.clone());
                continue;
            }
            self.record(format!("dynamo.batch_put {}", entry.compiler_id));
            table.insert(entry.compiler_id.clone(), entry.clone());
        }
        for key in delete_keys {
            if injected.contains(key) {
                failed.push(key.clone());
                continue;
            }
            self.record(format!("dynamo.batch_delete {key}"));
            table.remove(key);
        }
        Ok(BatchOutcome { failed_keys: failed })
    }
}

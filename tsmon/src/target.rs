use crate::proto::{MetricsData, NetworkDevice, Task};

const DEVICE_REALM: &str = "ACQ_CHROME";

/// Identity of the process or device emitting metrics.
///
/// A target is attached to every serialized data record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// A network device, such as a bot machine.
    Device {
        /// Region the device lives in.
        region: String,
        /// Role of the device.
        role: String,
        /// Network the device belongs to.
        network: String,
        /// Short hostname.
        hostname: String,
    },

    /// One task of a service's job.
    Task {
        /// Service the task belongs to.
        service_name: String,
        /// Job the task belongs to.
        job_name: String,
        /// Region the task runs in.
        region: String,
        /// Host the task runs on.
        hostname: String,
        /// Index of the task within its job.
        task_num: i32,
    },
}

impl Target {
    /// Creates a device target.
    pub fn device<R, O, N, H>(region: R, role: O, network: N, hostname: H) -> Self
    where
        R: Into<String>,
        O: Into<String>,
        N: Into<String>,
        H: Into<String>,
    {
        Target::Device {
            region: region.into(),
            role: role.into(),
            network: network.into(),
            hostname: hostname.into(),
        }
    }

    /// Creates a task target.
    pub fn task<S, J, R, H>(service_name: S, job_name: J, region: R, hostname: H, task_num: i32) -> Self
    where
        S: Into<String>,
        J: Into<String>,
        R: Into<String>,
        H: Into<String>,
    {
        Target::Task {
            service_name: service_name.into(),
            job_name: job_name.into(),
            region: region.into(),
            hostname: hostname.into(),
            task_num,
        }
    }

    /// Job name of a task target, or role of a device target.
    pub fn job_name(&self) -> &str {
        match self {
            Target::Device { role, .. } => role,
            Target::Task { job_name, .. } => job_name,
        }
    }

    /// Hostname of the target.
    pub fn hostname(&self) -> &str {
        match self {
            Target::Device { hostname, .. } | Target::Task { hostname, .. } => hostname,
        }
    }

    /// Task number of a task target, or zero for a device.
    pub fn task_num(&self) -> i32 {
        match self {
            Target::Device { .. } => 0,
            Target::Task { task_num, .. } => *task_num,
        }
    }

    /// Returns a copy of this target that identifies another instance of a job.
    ///
    /// For devices the job name is the role, and there is no task number to change.
    pub fn with_instance<J, H>(&self, job_name: J, hostname: H, task_num: i32) -> Self
    where
        J: Into<String>,
        H: Into<String>,
    {
        let mut target = self.clone();
        match &mut target {
            Target::Device { role, hostname: h, .. } => {
                *role = job_name.into();
                *h = hostname.into();
            }
            Target::Task { job_name: j, hostname: h, task_num: t, .. } => {
                *j = job_name.into();
                *h = hostname.into();
                *t = task_num;
            }
        }
        target
    }

    /// Fills in the target block of a data record.
    pub fn populate(&self, data: &mut MetricsData) {
        match self {
            Target::Device { region, role, network, hostname } => {
                data.network_device = Some(NetworkDevice {
                    alertable: Some(true),
                    realm: Some(DEVICE_REALM.to_string()),
                    metro: Some(region.clone()),
                    role: Some(role.clone()),
                    hostname: Some(hostname.clone()),
                    hostgroup: Some(network.clone()),
                });
            }
            Target::Task { service_name, job_name, region, hostname, task_num } => {
                data.task = Some(Task {
                    service_name: Some(service_name.clone()),
                    job_name: Some(job_name.clone()),
                    data_center: Some(region.clone()),
                    host_name: Some(hostname.clone()),
                    task_num: Some(*task_num),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Target;
    use crate::proto::MetricsData;

    #[test]
    fn populate_device() {
        let mut data = MetricsData::default();
        Target::device("reg", "role", "1", "slave1-a1").populate(&mut data);

        let device = data.network_device.unwrap();
        assert_eq!(device.metro.as_deref(), Some("reg"));
        assert_eq!(device.role.as_deref(), Some("role"));
        assert_eq!(device.hostgroup.as_deref(), Some("1"));
        assert_eq!(device.hostname.as_deref(), Some("slave1-a1"));
        assert_eq!(device.realm.as_deref(), Some("ACQ_CHROME"));
        assert!(data.task.is_none());
    }

    #[test]
    fn populate_task() {
        let mut data = MetricsData::default();
        Target::task("serv", "job", "reg", "host", 1).populate(&mut data);

        let task = data.task.unwrap();
        assert_eq!(task.service_name.as_deref(), Some("serv"));
        assert_eq!(task.job_name.as_deref(), Some("job"));
        assert_eq!(task.data_center.as_deref(), Some("reg"));
        assert_eq!(task.host_name.as_deref(), Some("host"));
        assert_eq!(task.task_num, Some(1));
        assert!(data.network_device.is_none());
    }

    #[test]
    fn instances() {
        let task = Target::task("serv", "job", "reg", "host", 1);
        let other = task.with_instance("job2", "other", 4);
        assert_eq!(other.hostname(), "other");
        assert_eq!(other.task_num(), 4);
        assert_eq!(other.job_name(), "job2");
        assert_eq!(task.hostname(), "host");
        assert_eq!(task.job_name(), "job");

        let device = Target::device("reg", "role", "net", "host").with_instance("role2", "other", 4);
        assert_eq!(device.hostname(), "other");
        assert_eq!(device.task_num(), 0);
        assert_eq!(device.job_name(), "role2");
    }
}

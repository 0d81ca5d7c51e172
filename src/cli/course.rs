//! studysync course command implementations.

use serde::Serialize;

use crate::cli::Context;
use crate::directory::Course;
use crate::error::Result;
use crate::output::{emit_success, Report};

pub fn run_add(ctx: &Context, name: &str, description: Option<&str>) -> Result<()> {
    let viewer = ctx.viewer()?;
    let course = ctx.store().create_course(name, description, &viewer)?;

    let mut report = Report::new(format!("studysync course add: created {}", course.id));
    report.field("name", course.name.clone());
    report.field("members", course.members.join(", "));
    report.hint(format!("studysync course join {}", course.id));
    report.hint(format!("studysync task add <title> --course {}", course.id));

    emit_success(ctx.output, "course add", &course, Some(&report))
}

pub fn run_join(ctx: &Context, course_id: &str, user: Option<String>) -> Result<()> {
    let user = match user {
        Some(user) => user,
        None => ctx.viewer()?,
    };
    let course = ctx.store().add_course_member(course_id, &user)?;

    let mut report = Report::new(format!("studysync course join: {user} joined {}", course.name));
    report.field("course", course.id.clone());
    report.field("members", course.members.len().to_string());

    emit_success(ctx.output, "course join", &course, Some(&report))
}

#[derive(Serialize)]
struct CourseList {
    courses: Vec<Course>,
}

pub fn run_list(ctx: &Context, all: bool) -> Result<()> {
    let doc = ctx.store().load()?;
    let courses: Vec<Course> = if all {
        doc.courses
    } else {
        let viewer = ctx.viewer()?;
        doc.courses
            .into_iter()
            .filter(|course| course.is_member(&viewer))
            .collect()
    };

    let mut report = Report::new(format!("studysync course list: {} course(s)", courses.len()));
    for course in &courses {
        report.item(format!(
            "{}  {}  ({} member(s))",
            course.id,
            course.name,
            course.members.len()
        ));
    }

    emit_success(ctx.output, "course list", &CourseList { courses }, Some(&report))
}

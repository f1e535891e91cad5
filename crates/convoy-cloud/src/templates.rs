//! Built-in stack templates
//!
//! Rendered with Tera by the descriptors in [`crate::descriptor`].

use crate::error::{CloudError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use tera::{Context, Tera};

/// Render `template` with the fields of `data` as variables
///
/// User-supplied strings go through `json_encode` in the templates, which
/// yields a double-quoted scalar that YAML reads back unchanged.
pub fn render(template: &str, data: &impl Serialize) -> Result<String> {
    let context = Context::from_serialize(data)?;
    Ok(Tera::one_off(template, &context, false)?)
}

/// Keys of the `Parameters` section of a rendered template
pub fn declared_parameters(rendered: &str) -> Result<BTreeSet<String>> {
    let doc: serde_yaml::Value = serde_yaml::from_str(rendered)
        .map_err(|e| CloudError::Template(format!("rendered template is not valid YAML: {}", e)))?;
    Ok(doc
        .get("Parameters")
        .and_then(serde_yaml::Value::as_mapping)
        .map(|params| {
            params
                .keys()
                .filter_map(serde_yaml::Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

/// Account-level roles for an application, deployed once in its home region
pub const APP_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: Convoy application {{ app }} account resources
Parameters:
  AppName:
    Type: String
  AppDNSDelegatedAccounts:
    Type: CommaDelimitedList
    Default: ''
Resources:
  AdministrationRole:
    Type: AWS::IAM::Role
    Properties:
      RoleName: {{ app }}-adminrole
      AssumeRolePolicyDocument:
        Statement:
          - Effect: Allow
            Principal: { Service: cloudformation.amazonaws.com }
            Action: sts:AssumeRole
  ExecutionRole:
    Type: AWS::IAM::Role
    Properties:
      RoleName: {{ app }}-executionrole
      AssumeRolePolicyDocument:
        Statement:
          - Effect: Allow
            Principal: { AWS: !GetAtt AdministrationRole.Arn }
            Action: sts:AssumeRole
{%- if domain %}
  HostedZone:
    Type: AWS::Route53::HostedZone
    Properties:
      Name: {{ app }}.{{ domain }}
  DNSDelegationRole:
    Type: AWS::IAM::Role
    Properties:
      RoleName: {{ app }}-DNSDelegationRole
      AssumeRolePolicyDocument:
        Statement:
          - Effect: Allow
            Principal:
              AWS: !Split [',', !Join [',', !Ref AppDNSDelegatedAccounts]]
            Action: sts:AssumeRole
{%- endif %}
Outputs:
  ExecutionRoleARN:
    Value: !GetAtt ExecutionRole.Arn
{%- if domain %}
  HostedZoneId:
    Value: !Ref HostedZone
{%- endif %}
"#;

/// Per-region application resources: image repositories and pipeline storage
pub const APP_REGIONAL_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: Convoy application {{ app }} regional resources
Parameters:
  AppName:
    Type: String
  Accounts:
    Type: CommaDelimitedList
    Default: ''
  Services:
    Type: CommaDelimitedList
    Default: ''
  PipelineResources:
    Type: String
    Default: 'false'
    AllowedValues: ['true', 'false']
Resources:
{%- for service in services %}
  ECRRepo{{ service | replace(from="-", to="") }}:
    Type: AWS::ECR::Repository
    Properties:
      RepositoryName: {{ app }}/{{ service }}
{%- endfor %}
{%- if pipeline %}
  KMSKey:
    Type: AWS::KMS::Key
    Properties:
      EnableKeyRotation: true
  PipelineBuiltArtifactBucket:
    Type: AWS::S3::Bucket
    Properties:
      BucketEncryption:
        ServerSideEncryptionConfiguration:
          - ServerSideEncryptionByDefault:
              SSEAlgorithm: aws:kms
              KMSMasterKeyID: !Ref KMSKey
{%- endif %}
{%- if not services and not pipeline %}
  Placeholder:
    Type: AWS::CloudFormation::WaitConditionHandle
{%- endif %}
Outputs:
{%- for service in services %}
  ECRRepo{{ service | replace(from="-", to="") }}:
    Value: !GetAtt ECRRepo{{ service | replace(from="-", to="") }}.Arn
{%- endfor %}
{%- if pipeline %}
  KMSKeyARN:
    Value: !GetAtt KMSKey.Arn
  PipelineBucket:
    Value: !Ref PipelineBuiltArtifactBucket
{%- endif %}
  TemplateVersion:
    Value: '{{ version }}'
"#;

/// Environment network and cluster
pub const ENVIRONMENT_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: Convoy environment {{ env }} for application {{ app }}
Parameters:
  AppName:
    Type: String
  EnvironmentName:
    Type: String
  ToolsAccountPrincipalARN:
    Type: String
Resources:
{%- if not imported_vpc %}
  VPC:
    Type: AWS::EC2::VPC
    Properties:
      CidrBlock: {{ vpc_cidr }}
      EnableDnsHostnames: true
      EnableDnsSupport: true
  InternetGateway:
    Type: AWS::EC2::InternetGateway
  InternetGatewayAttachment:
    Type: AWS::EC2::VPCGatewayAttachment
    Properties:
      VpcId: !Ref VPC
      InternetGatewayId: !Ref InternetGateway
  PublicRouteTable:
    Type: AWS::EC2::RouteTable
    Properties:
      VpcId: !Ref VPC
  DefaultPublicRoute:
    Type: AWS::EC2::Route
    DependsOn: InternetGatewayAttachment
    Properties:
      RouteTableId: !Ref PublicRouteTable
      DestinationCidrBlock: 0.0.0.0/0
      GatewayId: !Ref InternetGateway
{%- for cidr in public_subnets %}
  PublicSubnet{{ loop.index }}:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: {{ cidr }}
      AvailabilityZone: !Select [{{ loop.index0 }}, !GetAZs '']
      MapPublicIpOnLaunch: true
  PublicSubnet{{ loop.index }}RouteTableAssociation:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      RouteTableId: !Ref PublicRouteTable
      SubnetId: !Ref PublicSubnet{{ loop.index }}
{%- endfor %}
{%- for cidr in private_subnets %}
  PrivateSubnet{{ loop.index }}:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: {{ cidr }}
      AvailabilityZone: !Select [{{ loop.index0 }}, !GetAZs '']
{%- endfor %}
{%- endif %}
  EnvironmentSecurityGroup:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: Convoy {{ app }}-{{ env }} tasks
      VpcId: {% if imported_vpc %}{{ imported_vpc }}{% else %}!Ref VPC{% endif %}
  EnvironmentSecurityGroupIngressFromSelf:
    Type: AWS::EC2::SecurityGroupIngress
    Properties:
      GroupId: !Ref EnvironmentSecurityGroup
      IpProtocol: '-1'
      SourceSecurityGroupId: !Ref EnvironmentSecurityGroup
  Cluster:
    Type: AWS::ECS::Cluster
    Properties:
      ClusterName: {{ app }}-{{ env }}
  ServiceDiscoveryNamespace:
    Type: AWS::ServiceDiscovery::PrivateDnsNamespace
    Properties:
      Name: {{ env }}.{{ app }}.local
      Vpc: {% if imported_vpc %}{{ imported_vpc }}{% else %}!Ref VPC{% endif %}
  TaskExecutionRole:
    Type: AWS::IAM::Role
    Properties:
      AssumeRolePolicyDocument:
        Statement:
          - Effect: Allow
            Principal: { Service: ecs-tasks.amazonaws.com }
            Action: sts:AssumeRole
      ManagedPolicyArns:
        - arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy
  CloudformationExecutionRole:
    Type: AWS::IAM::Role
    Properties:
      RoleName: {{ app }}-{{ env }}-CFNExecutionRole
      AssumeRolePolicyDocument:
        Statement:
          - Effect: Allow
            Principal: { Service: cloudformation.amazonaws.com }
            Action: sts:AssumeRole
  EnvironmentManagerRole:
    Type: AWS::IAM::Role
    Properties:
      RoleName: {{ app }}-{{ env }}-EnvManagerRole
      AssumeRolePolicyDocument:
        Statement:
          - Effect: Allow
            Principal: { AWS: !Ref ToolsAccountPrincipalARN }
            Action: sts:AssumeRole
  EnvironmentBucket:
    Type: AWS::S3::Bucket
    Properties:
      PublicAccessBlockConfiguration:
        BlockPublicAcls: true
        BlockPublicPolicy: true
Outputs:
  ClusterId:
    Value: !Ref Cluster
  VpcId:
    Value: {% if imported_vpc %}{{ imported_vpc }}{% else %}!Ref VPC{% endif %}
  PublicSubnets:
{%- if imported_vpc %}
    Value: {{ imported_subnets | join(sep=",") | json_encode() }}
{%- else %}
    Value: !Join [',', [{% for cidr in public_subnets %}!Ref PublicSubnet{{ loop.index }}{% if not loop.last %}, {% endif %}{% endfor %}]]
{%- endif %}
    Export:
      Name: {{ app }}-{{ env }}-PublicSubnets
  EnvironmentSecurityGroup:
    Value: !Ref EnvironmentSecurityGroup
    Export:
      Name: {{ app }}-{{ env }}-EnvironmentSecurityGroup
  ExecutionRoleARN:
    Value: !GetAtt TaskExecutionRole.Arn
    Export:
      Name: {{ app }}-{{ env }}-ExecutionRoleARN
  ServiceDiscoveryNamespaceID:
    Value: !GetAtt ServiceDiscoveryNamespace.Id
  CFNExecutionRoleARN:
    Value: !GetAtt CloudformationExecutionRole.Arn
  EnvironmentManagerRoleARN:
    Value: !GetAtt EnvironmentManagerRole.Arn
  EnvironmentBucketName:
    Value: !Ref EnvironmentBucket
"#;

/// Long-running load-balanced or backend service
pub const SERVICE_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: Convoy service {{ name }} in environment {{ env }}
Parameters:
  AppName:
    Type: String
  EnvName:
    Type: String
  WorkloadName:
    Type: String
  ContainerImage:
    Type: String
  ContainerPort:
    Type: Number
  TaskCPU:
    Type: String
  TaskMemory:
    Type: String
  TaskCount:
    Type: Number
Resources:
  LogGroup:
    Type: AWS::Logs::LogGroup
    Properties:
      LogGroupName: /convoy/{{ app }}-{{ env }}-{{ name }}
      RetentionInDays: 30
  TaskDefinition:
    Type: AWS::ECS::TaskDefinition
    Properties:
      Family: {{ app }}-{{ env }}-{{ name }}
      Cpu: !Ref TaskCPU
      Memory: !Ref TaskMemory
      NetworkMode: awsvpc
      RequiresCompatibilities: [FARGATE]
      ExecutionRoleArn: !ImportValue {{ app }}-{{ env }}-ExecutionRoleARN
      ContainerDefinitions:
        - Name: {{ name }}
          Image: !Ref ContainerImage
          PortMappings:
            - ContainerPort: !Ref ContainerPort
          Environment:
{%- for key, value in variables %}
            - Name: {{ key | json_encode() }}
              Value: {{ value | json_encode() }}
{%- endfor %}
            - Name: CONVOY_ENVIRONMENT_NAME
              Value: !Ref EnvName
{%- if secrets %}
          Secrets:
{%- for key, value in secrets %}
            - Name: {{ key | json_encode() }}
              ValueFrom: {{ value | json_encode() }}
{%- endfor %}
{%- endif %}
          LogConfiguration:
            LogDriver: awslogs
            Options:
              awslogs-group: !Ref LogGroup
              awslogs-region: !Ref AWS::Region
              awslogs-stream-prefix: convoy
  Service:
    Type: AWS::ECS::Service
    Properties:
      Cluster: {{ app }}-{{ env }}
      TaskDefinition: !Ref TaskDefinition
      DesiredCount: !Ref TaskCount
      LaunchType: FARGATE
      NetworkConfiguration:
        AwsvpcConfiguration:
          AssignPublicIp: ENABLED
          Subnets: !Split [',', !ImportValue {{ app }}-{{ env }}-PublicSubnets]
          SecurityGroups:
            - !ImportValue {{ app }}-{{ env }}-EnvironmentSecurityGroup
Outputs:
  ServiceName:
    Value: !GetAtt Service.Name
  LogGroupName:
    Value: !Ref LogGroup
"#;

/// CI/CD pipeline that promotes a source revision through environments
pub const PIPELINE_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: Convoy pipeline {{ name }} for application {{ app }}
Resources:
  PipelineRole:
    Type: AWS::IAM::Role
    Properties:
      AssumeRolePolicyDocument:
        Statement:
          - Effect: Allow
            Principal: { Service: codepipeline.amazonaws.com }
            Action: sts:AssumeRole
  BuildProject:
    Type: AWS::CodeBuild::Project
    Properties:
      Name: {{ name }}-build
      ServiceRole: !GetAtt PipelineRole.Arn
      Artifacts: { Type: CODEPIPELINE }
      Environment:
        Type: LINUX_CONTAINER
        ComputeType: BUILD_GENERAL1_SMALL
        Image: aws/codebuild/amazonlinux2-x86_64-standard:5.0
        PrivilegedMode: true
      Source: { Type: CODEPIPELINE }
  Pipeline:
    Type: AWS::CodePipeline::Pipeline
    Properties:
      Name: {{ name }}
      RoleArn: !GetAtt PipelineRole.Arn
      ArtifactStores:
{%- for region, bucket in artifact_buckets %}
        - Region: {{ region }}
          ArtifactStore:
            Type: S3
            Location: {{ bucket }}
{%- endfor %}
      Stages:
        - Name: Source
          Actions:
            - Name: SourceCodeFor-{{ app }}
              ActionTypeId: { Category: Source, Owner: ThirdParty, Provider: {{ source_provider }}, Version: 1 }
              Configuration:
                Repo: {{ source_repository }}
                Branch: {{ source_branch }}
              OutputArtifacts: [{ Name: SCCheckoutArtifact }]
        - Name: Build
          Actions:
            - Name: Build
              ActionTypeId: { Category: Build, Owner: AWS, Provider: CodeBuild, Version: 1 }
              Configuration:
                ProjectName: !Ref BuildProject
              InputArtifacts: [{ Name: SCCheckoutArtifact }]
              OutputArtifacts: [{ Name: BuildOutput }]
{%- for stage in stages %}
        - Name: DeployTo-{{ stage.env }}
          Actions:
{%- if stage.requires_approval %}
            - Name: ApprovePromotionTo-{{ stage.env }}
              ActionTypeId: { Category: Approval, Owner: AWS, Provider: Manual, Version: 1 }
              RunOrder: 1
{%- endif %}
            - Name: CreateOrUpdate-{{ stage.env }}
              ActionTypeId: { Category: Deploy, Owner: AWS, Provider: CloudFormation, Version: 1 }
              Region: {{ stage.region }}
              RunOrder: 2
              InputArtifacts: [{ Name: BuildOutput }]
{%- endfor %}
Outputs:
  PipelineName:
    Value: !Ref Pipeline
  PipelineStages:
    Value: '{% for stage in stages %}{{ stage.env }}{% if not loop.last %},{% endif %}{% endfor %}'
"#;

/// One-off task resources: image repository, log group and task definition
pub const TASK_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: Convoy one-off task {{ group }}
Parameters:
  TaskCPU:
    Type: String
  TaskMemory:
    Type: String
  ContainerImage:
    Type: String
    Default: ''
Conditions:
  HasImage: !Not [!Equals [!Ref ContainerImage, '']]
Resources:
  ECRRepo:
    Type: AWS::ECR::Repository
    Properties:
      RepositoryName: convoy-{{ group }}
  LogGroup:
    Type: AWS::Logs::LogGroup
    Properties:
      LogGroupName: /convoy/tasks/{{ group }}
      RetentionInDays: 1
  ExecutionRole:
    Type: AWS::IAM::Role
    Properties:
      AssumeRolePolicyDocument:
        Statement:
          - Effect: Allow
            Principal: { Service: ecs-tasks.amazonaws.com }
            Action: sts:AssumeRole
      ManagedPolicyArns:
        - arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy
  TaskDefinition:
    Type: AWS::ECS::TaskDefinition
    Properties:
      Family: convoy-{{ group }}
      Cpu: !Ref TaskCPU
      Memory: !Ref TaskMemory
      NetworkMode: awsvpc
      RequiresCompatibilities: [FARGATE]
      ExecutionRoleArn: !GetAtt ExecutionRole.Arn
      ContainerDefinitions:
        - Name: {{ group }}
          Image: !If [HasImage, !Ref ContainerImage, !GetAtt ECRRepo.RepositoryUri]
{%- if command %}
          Command: {{ command | json_encode() }}
{%- endif %}
{%- if variables %}
          Environment:
{%- for key, value in variables %}
            - Name: {{ key | json_encode() }}
              Value: {{ value | json_encode() }}
{%- endfor %}
{%- endif %}
          LogConfiguration:
            LogDriver: awslogs
            Options:
              awslogs-group: !Ref LogGroup
              awslogs-region: !Ref AWS::Region
              awslogs-stream-prefix: convoy-task
Outputs:
  ECRRepo:
    Value: !GetAtt ECRRepo.RepositoryUri
  LogGroupName:
    Value: !Ref LogGroup
  ExecutionRoleARN:
    Value: !GetAtt ExecutionRole.Arn
  TaskDefinitionArn:
    Value: !Ref TaskDefinition
"#;
